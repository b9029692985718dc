mod helpers;

mod debugger_tests;
mod direct_tests;
