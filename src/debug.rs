//! Remote debug channel
//!
//! Newline-delimited JSON over TCP, one controlling client at a time. The
//! manager owns the listener and the lifecycle; a `DebugSession` is the
//! executor-facing handle: a blocking command receiver (the pause gate
//! parks on it from a blocking thread) plus an event sender feeding the
//! client writer task.

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::executor::ExecutionStrategy;

/* ===================== Wire Protocol ===================== */

/// Commands a client sends, one JSON object per line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum WireCommand {
    Step,
    Continue,
    Detach,
    SetBreakpoint { unit: String },
    ClearBreakpoint { unit: String },
}

/// Run-control command delivered to the pause gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCommand {
    Step,
    Continue,
    Detach,
}

/// Events streamed back to the client, one JSON object per line.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DebugEvent {
    Paused {
        unit: String,
        statement: String,
        depth: usize,
    },
    Resumed,
    BreakpointHit {
        unit: String,
    },
    Completed {
        result: String,
    },
    Failed {
        message: String,
    },
}

/* ===================== Session ===================== */

/// Executor-facing handle for one connected client.
pub struct DebugSession {
    commands: Mutex<mpsc::Receiver<DebugCommand>>,
    events: UnboundedSender<DebugEvent>,
    breakpoints: RwLock<HashSet<String>>,
}

impl DebugSession {
    fn channelled() -> (
        Arc<Self>,
        mpsc::Sender<DebugCommand>,
        UnboundedReceiver<DebugEvent>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = unbounded_channel();
        let session = Arc::new(DebugSession {
            commands: Mutex::new(cmd_rx),
            events: event_tx,
            breakpoints: RwLock::new(HashSet::new()),
        });
        (session, cmd_tx, event_rx)
    }

    /// Session with no transport behind it, for driving the gate from tests.
    pub fn in_memory() -> (
        Arc<Self>,
        mpsc::Sender<DebugCommand>,
        UnboundedReceiver<DebugEvent>,
    ) {
        Self::channelled()
    }

    /// Block until the client sends a run-control command. A closed channel
    /// means the client is gone; the program is released rather than left
    /// parked at the gate.
    pub fn next_command(&self) -> DebugCommand {
        let rx = match self.commands.lock() {
            Ok(rx) => rx,
            Err(poisoned) => poisoned.into_inner(),
        };
        rx.recv().unwrap_or(DebugCommand::Detach)
    }

    pub fn emit(&self, event: DebugEvent) {
        // Writer gone means the client disconnected; nothing to report to.
        let _ = self.events.send(event);
    }

    pub fn has_breakpoint(&self, unit: &str) -> bool {
        match self.breakpoints.read() {
            Ok(set) => set.contains(unit),
            Err(poisoned) => poisoned.into_inner().contains(unit),
        }
    }

    pub fn set_breakpoint(&self, unit: String) {
        let mut set = match self.breakpoints.write() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.insert(unit);
    }

    pub fn clear_breakpoint(&self, unit: &str) {
        let mut set = match self.breakpoints.write() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.remove(unit);
    }
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession").finish_non_exhaustive()
    }
}

/* ===================== Manager ===================== */

/// Owns the debug listener and the single active session.
pub struct DebugManager {
    port: u16,
    session: Mutex<Option<Arc<DebugSession>>>,
    debugger: Mutex<Option<Arc<ExecutionStrategy>>>,
    connected: AtomicBool,
    connect_notify: Notify,
    done_notify: Notify,
    done: AtomicBool,
}

impl DebugManager {
    pub fn new(port: u16) -> Arc<Self> {
        Arc::new(DebugManager {
            port,
            session: Mutex::new(None),
            debugger: Mutex::new(None),
            connected: AtomicBool::new(false),
            connect_notify: Notify::new(),
            done_notify: Notify::new(),
            done: AtomicBool::new(false),
        })
    }

    /// Bind the listener and start accepting. Returns the bound port
    /// (meaningful when constructed with port 0).
    pub async fn init(self: &Arc<Self>) -> io::Result<u16> {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).await?;
        let port = listener.local_addr()?.port();
        info!(port, "debug listener started, waiting for a client");

        let manager = self.clone();
        tokio::spawn(async move {
            manager.accept_loop(listener).await;
        });
        Ok(port)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "debug accept failed");
                    continue;
                }
            };
            info!(%peer, "debug client connected");

            let (session, cmd_tx, event_rx) = DebugSession::channelled();
            {
                let mut slot = match self.session.lock() {
                    Ok(slot) => slot,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *slot = Some(session);
            }
            self.connected.store(true, Ordering::SeqCst);
            self.connect_notify.notify_waiters();

            // One client at a time: serve this connection to completion
            // before accepting another.
            self.clone().serve_client(socket, cmd_tx, event_rx).await;
            info!(%peer, "debug client disconnected");
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    async fn serve_client(
        self: Arc<Self>,
        socket: tokio::net::TcpStream,
        cmd_tx: mpsc::Sender<DebugCommand>,
        mut event_rx: UnboundedReceiver<DebugEvent>,
    ) {
        let (read_half, mut write_half) = socket.into_split();

        let writer = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let mut line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "failed to encode debug event");
                        continue;
                    }
                };
                line.push('\n');
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let command: WireCommand = match serde_json::from_str(line) {
                Ok(command) => command,
                Err(e) => {
                    warn!(error = %e, line, "unparseable debug command");
                    continue;
                }
            };
            debug!(?command, "debug command received");

            match command {
                WireCommand::Step => {
                    if cmd_tx.send(DebugCommand::Step).is_err() {
                        break;
                    }
                }
                WireCommand::Continue => {
                    if cmd_tx.send(DebugCommand::Continue).is_err() {
                        break;
                    }
                }
                WireCommand::Detach => {
                    let _ = cmd_tx.send(DebugCommand::Detach);
                    break;
                }
                WireCommand::SetBreakpoint { unit } => {
                    if let Some(session) = self.session() {
                        session.set_breakpoint(unit);
                    }
                }
                WireCommand::ClearBreakpoint { unit } => {
                    if let Some(session) = self.session() {
                        session.clear_breakpoint(&unit);
                    }
                }
            }
        }

        // Reader is done: releasing the command sender unblocks a program
        // parked at the gate (recv error maps to Detach).
        drop(cmd_tx);
        writer.abort();
        self.done.store(true, Ordering::SeqCst);
        self.done_notify.notify_waiters();
    }

    /// Park until a controlling client has attached.
    pub async fn wait_till_client_connect(&self) {
        while !self.connected.load(Ordering::SeqCst) {
            let notified = self.connect_notify.notified();
            if self.connected.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    pub fn session(&self) -> Option<Arc<DebugSession>> {
        match self.session.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Install the strategy new contexts should execute under while this
    /// session is attached.
    pub fn set_debugger(&self, strategy: Arc<ExecutionStrategy>) {
        let mut slot = match self.debugger.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(strategy);
    }

    pub fn debugger(&self) -> Option<Arc<ExecutionStrategy>> {
        match self.debugger.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Drop the active session handle; the transport tears down when the
    /// client side closes.
    pub fn end_session(&self) {
        let mut slot = match self.session.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;
        drop(slot);
        let mut debugger = match self.debugger.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *debugger = None;
        drop(debugger);
        self.done.store(true, Ordering::SeqCst);
        self.done_notify.notify_waiters();
    }

    /// Keep the process around until the debug exchange is over.
    pub async fn hold_on(&self) {
        while !self.done.load(Ordering::SeqCst) {
            let notified = self.done_notify.notified();
            if self.done.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for DebugManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugManager")
            .field("port", &self.port)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}
