//! Process relay: the only place that creates or signals OS processes.
//!
//! Runs as a single actor task. Requests are handled one at a time in arrival
//! order, so the registry needs no locking; output pumps run as separate tasks
//! and report exits back through an internal channel.

mod kill;
mod process;
mod registry;

pub use process::ShellSpec;

use crate::model::{exit_notice, CommandMessage, RelayEvent, RelayRequest, RunState};
use anyhow::Result;
use process::ProcessExit;
use registry::{ProcessEntry, Registry};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub shell: ShellSpec,
    /// Extra wait between the terminal signal and the exit notice. Output is
    /// already drained when the signal fires, so zero keeps ordering intact.
    pub exit_notice_delay: Duration,
}

pub struct ProcessRelay {
    cfg: RelayConfig,
    registry: Registry,
}

impl ProcessRelay {
    pub fn new(cfg: RelayConfig) -> Self {
        Self {
            cfg,
            registry: Registry::default(),
        }
    }

    /// Serve requests until `Shutdown` or until every request sender is dropped.
    pub async fn run(
        mut self,
        mut req_rx: UnboundedReceiver<RelayRequest>,
        event_tx: UnboundedSender<RelayEvent>,
    ) -> Result<()> {
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<ProcessExit>();
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<CommandMessage>();

        loop {
            tokio::select! {
                req = req_rx.recv() => {
                    match req {
                        Some(RelayRequest::Start(m)) => self.start(m, &event_tx, &exit_tx),
                        Some(RelayRequest::Stop(m)) => self.stop(m, &event_tx),
                        Some(RelayRequest::Shutdown) | None => {
                            self.shutdown();
                            break;
                        }
                    }
                }
                exit = recv_open(&mut exit_rx) => {
                    self.reap(exit, &event_tx, &notice_tx);
                }
                notice = recv_open(&mut notice_rx) => {
                    self.deliver_notice(notice, &event_tx);
                }
            }
        }

        Ok(())
    }

    fn start(
        &mut self,
        request: CommandMessage,
        event_tx: &UnboundedSender<RelayEvent>,
        exit_tx: &UnboundedSender<ProcessExit>,
    ) {
        if request.run_state.is_running() || self.registry.has_command(request.id) {
            tracing::debug!(id = request.id, "start ignored: already running");
            return;
        }

        let cwd = Path::new(&request.path);
        let child = match process::spawn_shell(&self.cfg.shell, &request.cmd, cwd) {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(id = request.id, cmd = %request.cmd, path = %request.path, "spawn failed: {e}");
                let _ = event_tx.send(RelayEvent::Output(CommandMessage {
                    run_state: RunState::NotRunning,
                    msg: format!("Failed to start process: {e}\n"),
                    disabled: false,
                    ..request
                }));
                return;
            }
        };

        let Some(pid) = child.id() else {
            // Already reaped before we could look; nothing to register.
            tracing::warn!(id = request.id, "child exited before registration");
            return;
        };

        tracing::info!(pid, id = request.id, cmd = %request.cmd, path = %request.path, "process started");
        self.registry.insert(ProcessEntry::new(pid, &request));
        tokio::spawn(process::pump_output(
            child,
            pid,
            request,
            process::DRAIN_GRACE,
            event_tx.clone(),
            exit_tx.clone(),
        ));
    }

    fn stop(&mut self, request: CommandMessage, event_tx: &UnboundedSender<RelayEvent>) {
        let Some(pid) = request.run_state.pid() else {
            tracing::warn!(id = request.id, "stop ignored: request carries no pid");
            return;
        };

        if let Some(entry) = self.registry.get(pid) {
            tracing::info!(pid, id = entry.id, name = %entry.name, "terminating process tree");
        } else {
            tracing::debug!(pid, "terminating unregistered pid");
        }
        kill::kill_tree(pid);
        self.registry.mark_terminating(pid);
        let _ = event_tx.send(RelayEvent::KillRequested(request));
    }

    fn reap(
        &mut self,
        exit: ProcessExit,
        event_tx: &UnboundedSender<RelayEvent>,
        notice_tx: &UnboundedSender<CommandMessage>,
    ) {
        let ProcessExit { pid, code, request } = exit;
        if let Some(entry) = self.registry.remove(pid) {
            let runtime = time::OffsetDateTime::now_utc() - entry.started_at;
            tracing::info!(
                pid,
                id = entry.id,
                cmd = %entry.cmd,
                path = %entry.path,
                status = ?entry.status,
                disabled = entry.disabled,
                code = ?code,
                runtime_ms = runtime.whole_milliseconds() as i64,
                "process exited"
            );
        }

        let _ = event_tx.send(RelayEvent::Terminal { id: request.id });

        let notice = CommandMessage {
            msg: exit_notice(code),
            disabled: false,
            ..request
        };
        if self.cfg.exit_notice_delay.is_zero() {
            let _ = event_tx.send(RelayEvent::Output(notice));
        } else {
            let delay = self.cfg.exit_notice_delay;
            let tx = notice_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(notice);
            });
        }
    }

    /// Emit a delayed exit notice unless the command has been started again
    /// meanwhile; the notice would otherwise mark the new run as finished.
    fn deliver_notice(&self, notice: CommandMessage, event_tx: &UnboundedSender<RelayEvent>) {
        if self.registry.has_command(notice.id) {
            tracing::debug!(id = notice.id, "exit notice dropped: command running again");
            return;
        }
        let _ = event_tx.send(RelayEvent::Output(notice));
    }

    fn shutdown(&mut self) {
        if self.registry.is_empty() {
            return;
        }
        tracing::info!(count = self.registry.len(), "terminating remaining processes");
        for pid in self.registry.pids() {
            kill::kill_tree(pid);
        }
    }
}

/// Receive from a channel whose sender is held by the caller; never yields `None`.
async fn recv_open<T>(rx: &mut UnboundedReceiver<T>) -> T {
    match rx.recv().await {
        Some(v) => v,
        None => futures::future::pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::model::EXIT_NOTICE_PREFIX;
    use tokio::time::{timeout, Instant};

    const WAIT: Duration = Duration::from_secs(10);

    fn request(id: i64, cmd: &str) -> CommandMessage {
        CommandMessage {
            run_state: RunState::NotRunning,
            msg: String::new(),
            id,
            cmd: cmd.into(),
            name: format!("cmd-{id}"),
            path: std::env::temp_dir().to_string_lossy().into_owned(),
            disabled: true,
        }
    }

    fn start_relay(
        cfg: RelayConfig,
    ) -> (
        UnboundedSender<RelayRequest>,
        UnboundedReceiver<RelayEvent>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(ProcessRelay::new(cfg).run(req_rx, event_tx));
        (req_tx, event_rx, handle)
    }

    async fn next(rx: &mut UnboundedReceiver<RelayEvent>) -> RelayEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("relay event in time")
            .expect("relay channel open")
    }

    /// Collect events for `id` until its exit notice arrives.
    async fn until_exit(rx: &mut UnboundedReceiver<RelayEvent>) -> Vec<RelayEvent> {
        let mut seen = Vec::new();
        loop {
            let ev = next(rx).await;
            let done = matches!(&ev, RelayEvent::Output(m) if m.msg.starts_with(EXIT_NOTICE_PREFIX));
            seen.push(ev);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn echo_streams_output_then_terminal_then_notice() {
        let (req_tx, mut rx, handle) = start_relay(RelayConfig::default());
        req_tx
            .send(RelayRequest::Start(request(1, "echo hi")))
            .unwrap();

        let events = until_exit(&mut rx).await;
        assert_eq!(events.len(), 3, "{events:?}");

        match &events[0] {
            RelayEvent::Output(m) => {
                assert_eq!(m.msg, "hi\n");
                assert!(m.run_state.is_running());
                assert!(m.disabled);
                assert_eq!(m.name, "cmd-1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(events[1], RelayEvent::Terminal { id: 1 });
        match &events[2] {
            RelayEvent::Output(m) => {
                assert_eq!(m.msg, "Process exited with code: 0");
                assert_eq!(m.run_state, RunState::NotRunning);
                assert!(!m.disabled);
            }
            other => panic!("unexpected {other:?}"),
        }

        req_tx.send(RelayRequest::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stdout_and_stderr_both_arrive_in_stream_order() {
        let (req_tx, mut rx, _handle) = start_relay(RelayConfig::default());
        req_tx
            .send(RelayRequest::Start(request(
                2,
                "echo a; echo b 1>&2; echo c; echo d 1>&2; exit 3",
            )))
            .unwrap();

        let events = until_exit(&mut rx).await;
        let chunks: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Output(m) if m.run_state.is_running() => Some(m.msg.clone()),
                _ => None,
            })
            .collect();
        let pos = |s: &str| chunks.iter().position(|c| c == s).expect(s);
        assert_eq!(chunks.len(), 4);
        assert!(pos("a\n") < pos("c\n"));
        assert!(pos("b\n") < pos("d\n"));

        match events.last() {
            Some(RelayEvent::Output(m)) => assert_eq!(m.msg, "Process exited with code: 3"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_with_pid_is_a_noop() {
        let mut relay = ProcessRelay::new(RelayConfig::default());
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (exit_tx, _exit_rx) = mpsc::unbounded_channel();

        let mut req = request(3, "echo nope");
        req.run_state = RunState::Running { pid: 4242 };
        relay.start(req, &event_tx, &exit_tx);

        assert!(relay.registry.is_empty());
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_start_for_live_command_is_ignored() {
        let mut relay = ProcessRelay::new(RelayConfig::default());
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let (exit_tx, _exit_rx) = mpsc::unbounded_channel();

        relay.start(request(4, "sleep 30"), &event_tx, &exit_tx);
        relay.start(request(4, "sleep 30"), &event_tx, &exit_tx);
        assert_eq!(relay.registry.len(), 1);

        relay.shutdown();
    }

    #[tokio::test]
    async fn spawn_failure_reports_and_reenables() {
        let (req_tx, mut rx, _handle) = start_relay(RelayConfig::default());
        let mut req = request(5, "echo never");
        req.path = "/definitely/not/a/dir".into();
        req_tx.send(RelayRequest::Start(req)).unwrap();

        match next(&mut rx).await {
            RelayEvent::Output(m) => {
                assert!(m.msg.starts_with("Failed to start process"));
                assert_eq!(m.run_state, RunState::NotRunning);
                assert!(!m.disabled);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_kills_tree_and_delays_notice() {
        let delay = Duration::from_millis(300);
        let (req_tx, mut rx, handle) = start_relay(RelayConfig {
            exit_notice_delay: delay,
            ..Default::default()
        });
        req_tx
            .send(RelayRequest::Start(request(
                6,
                "echo ready; sleep 30 & sleep 30; wait",
            )))
            .unwrap();

        let pid = match next(&mut rx).await {
            RelayEvent::Output(m) => {
                assert_eq!(m.msg, "ready\n");
                m.run_state.pid().expect("running pid")
            }
            other => panic!("unexpected {other:?}"),
        };

        let mut stop = request(6, "echo ready; sleep 30 & sleep 30; wait");
        stop.run_state = RunState::Running { pid };
        stop.msg = "ready\n".into();
        req_tx.send(RelayRequest::Stop(stop.clone())).unwrap();

        assert_eq!(next(&mut rx).await, RelayEvent::KillRequested(stop));
        assert_eq!(next(&mut rx).await, RelayEvent::Terminal { id: 6 });
        let terminal_at = Instant::now();

        match next(&mut rx).await {
            RelayEvent::Output(m) => {
                assert!(m.msg.starts_with(EXIT_NOTICE_PREFIX));
                assert_eq!(m.run_state, RunState::NotRunning);
                assert!(!m.disabled);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(terminal_at.elapsed() >= delay);

        req_tx.send(RelayRequest::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn delayed_notice_is_dropped_once_command_runs_again() {
        let delay = Duration::from_millis(300);
        let (req_tx, mut rx, handle) = start_relay(RelayConfig {
            exit_notice_delay: delay,
            ..Default::default()
        });
        req_tx.send(RelayRequest::Start(request(8, "true"))).unwrap();
        assert_eq!(next(&mut rx).await, RelayEvent::Terminal { id: 8 });

        req_tx
            .send(RelayRequest::Start(request(8, "echo again; sleep 30")))
            .unwrap();
        match next(&mut rx).await {
            RelayEvent::Output(m) => {
                assert_eq!(m.msg, "again\n");
                assert!(m.run_state.is_running());
            }
            other => panic!("unexpected {other:?}"),
        }

        // The first run's notice comes due while the second run is live.
        assert!(timeout(delay * 2, rx.recv()).await.is_err());

        req_tx.send(RelayRequest::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn exit_is_reported_while_background_child_holds_pipes() {
        let (req_tx, mut rx, handle) = start_relay(RelayConfig::default());
        let started = Instant::now();
        req_tx
            .send(RelayRequest::Start(request(10, "echo up; sleep 6 &")))
            .unwrap();

        let events = until_exit(&mut rx).await;
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "exit waited for the background child: {:?}",
            started.elapsed()
        );
        assert_eq!(events.len(), 3, "{events:?}");
        assert!(matches!(&events[0], RelayEvent::Output(m) if m.msg == "up\n"));
        assert_eq!(events[1], RelayEvent::Terminal { id: 10 });
        match &events[2] {
            RelayEvent::Output(m) => assert_eq!(m.msg, "Process exited with code: 0"),
            other => panic!("unexpected {other:?}"),
        }

        req_tx.send(RelayRequest::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_terminates_live_processes() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let (req_tx, mut rx, handle) = start_relay(RelayConfig::default());
        req_tx
            .send(RelayRequest::Start(request(9, "echo up; sleep 30")))
            .unwrap();
        let pid = match next(&mut rx).await {
            RelayEvent::Output(m) => m.run_state.pid().expect("running pid"),
            other => panic!("unexpected {other:?}"),
        };

        req_tx.send(RelayRequest::Shutdown).unwrap();
        timeout(WAIT, handle)
            .await
            .expect("relay exits")
            .unwrap()
            .unwrap();

        // The output pump still owns the child and reaps it once it dies.
        let target = Pid::from_raw(pid as i32);
        let deadline = Instant::now() + WAIT;
        while kill(target, None::<Signal>).is_ok() {
            assert!(Instant::now() < deadline, "pid {pid} survived shutdown");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn stop_without_pid_is_ignored() {
        let mut relay = ProcessRelay::new(RelayConfig::default());
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        relay.stop(request(7, "true"), &event_tx);
        assert!(event_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_senders_stops_the_relay() {
        let (req_tx, _rx, handle) = start_relay(RelayConfig::default());
        drop(req_tx);
        timeout(WAIT, handle)
            .await
            .expect("relay exits")
            .unwrap()
            .unwrap();
    }
}
