//! Spawning shell children and pumping their output back as relay events.

use crate::model::{CommandMessage, RelayEvent, RunState};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;

/// Program and flag used to interpret command text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSpec {
    pub program: String,
    pub flag: String,
}

impl Default for ShellSpec {
    fn default() -> Self {
        if cfg!(windows) {
            Self {
                program: "cmd".into(),
                flag: "/C".into(),
            }
        } else {
            Self {
                program: "sh".into(),
                flag: "-c".into(),
            }
        }
    }
}

impl ShellSpec {
    /// Use a custom shell program, picking the flag from its name.
    pub fn from_program(program: &str) -> Self {
        let stem = Path::new(program)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(program)
            .to_ascii_lowercase();
        let flag = match stem.as_str() {
            "cmd" => "/C",
            "powershell" | "pwsh" => "-Command",
            _ => "-c",
        };
        Self {
            program: program.to_string(),
            flag: flag.to_string(),
        }
    }
}

/// Reported to the relay once a child has exited and its streams are drained
/// or abandoned.
#[derive(Debug)]
pub(crate) struct ProcessExit {
    pub pid: u32,
    pub code: Option<i32>,
    pub request: CommandMessage,
}

pub(crate) fn spawn_shell(shell: &ShellSpec, cmd: &str, cwd: &Path) -> std::io::Result<Child> {
    let mut std_cmd = std::process::Command::new(&shell.program);
    std_cmd
        .arg(&shell.flag)
        .arg(cmd)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    // Own process group so a kill can address everything the shell starts.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std_cmd.process_group(0);
    }
    Command::from(std_cmd).spawn()
}

/// How long the pipes may keep draining after the shell itself has exited.
/// Backgrounded grandchildren can hold them open indefinitely.
pub(crate) const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Forward output of `reader` as events for `pid`.
///
/// Complete lines go out one event each, newline kept. Bytes without a
/// newline (prompts, `\r` progress bars) are flushed as soon as they are
/// read, holding back only an incomplete UTF-8 sequence.
async fn forward_output<R>(
    mut reader: R,
    pid: u32,
    request: &CommandMessage,
    event_tx: &UnboundedSender<RelayEvent>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let available = match reader.fill_buf().await {
            Ok(buf) => buf,
            Err(e) => {
                tracing::debug!(pid, "output stream closed with error: {e}");
                break;
            }
        };
        if available.is_empty() {
            break;
        }
        let take = available
            .iter()
            .position(|&b| b == b'\n')
            .map_or(available.len(), |i| i + 1);
        pending.extend_from_slice(&available[..take]);
        reader.consume(take);

        let cut = if pending.last() == Some(&b'\n') {
            pending.len()
        } else {
            utf8_boundary(&pending)
        };
        if cut > 0 {
            send_chunk(&pending[..cut], pid, request, event_tx);
            pending.drain(..cut);
        }
    }
    if !pending.is_empty() {
        send_chunk(&pending, pid, request, event_tx);
    }
}

/// Length of the longest prefix that does not end inside a UTF-8 sequence.
fn utf8_boundary(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => bytes.len(),
    }
}

fn send_chunk(
    bytes: &[u8],
    pid: u32,
    request: &CommandMessage,
    event_tx: &UnboundedSender<RelayEvent>,
) {
    let _ = event_tx.send(RelayEvent::Output(CommandMessage {
        run_state: RunState::Running { pid },
        msg: String::from_utf8_lossy(bytes).into_owned(),
        ..request.clone()
    }));
}

/// Pump both output streams, wait for the shell to exit, then notify the relay.
///
/// Output still buffered in the pipes gets `grace` to arrive after the exit.
/// Pumps held open past that by surviving descendants are aborted, and the
/// exit is reported anyway.
pub(crate) async fn pump_output(
    mut child: Child,
    pid: u32,
    request: CommandMessage,
    grace: Duration,
    event_tx: UnboundedSender<RelayEvent>,
    exit_tx: UnboundedSender<ProcessExit>,
) {
    let mut out_task = child.stdout.take().map(|s| {
        let (request, event_tx) = (request.clone(), event_tx.clone());
        tokio::spawn(async move {
            forward_output(BufReader::new(s), pid, &request, &event_tx).await;
        })
    });
    let mut err_task = child.stderr.take().map(|s| {
        let (request, event_tx) = (request.clone(), event_tx.clone());
        tokio::spawn(async move {
            forward_output(BufReader::new(s), pid, &request, &event_tx).await;
        })
    });

    let status = child.wait().await;

    let drained = tokio::time::timeout(grace, async {
        if let Some(t) = out_task.as_mut() {
            let _ = t.await;
        }
        if let Some(t) = err_task.as_mut() {
            let _ = t.await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::debug!(pid, "output still open after exit; descendants hold the pipes");
        for t in out_task.iter().chain(err_task.iter()) {
            t.abort();
        }
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!(pid, "failed to wait for child: {e}");
            None
        }
    };
    let _ = exit_tx.send(ProcessExit { pid, code, request });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn shell_flag_follows_program_name() {
        assert_eq!(ShellSpec::from_program("/bin/bash").flag, "-c");
        assert_eq!(ShellSpec::from_program("cmd.exe").flag, "/C");
        assert_eq!(ShellSpec::from_program("pwsh").flag, "-Command");
    }

    fn request() -> CommandMessage {
        CommandMessage {
            run_state: RunState::NotRunning,
            msg: String::new(),
            id: 1,
            cmd: "printf".into(),
            name: String::new(),
            path: "/tmp".into(),
            disabled: true,
        }
    }

    async fn collect<R: AsyncBufRead + Unpin>(reader: R) -> Vec<String> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        forward_output(reader, 7, &request(), &tx).await;
        drop(tx);

        let mut got = Vec::new();
        while let Some(RelayEvent::Output(m)) = rx.recv().await {
            assert_eq!(m.run_state, RunState::Running { pid: 7 });
            assert!(m.disabled);
            got.push(m.msg);
        }
        got
    }

    #[tokio::test]
    async fn lines_keep_their_newlines() {
        let got = collect(&b"one\ntwo\nthree"[..]).await;
        assert_eq!(got, vec!["one\n", "two\n", "three"]);
    }

    #[tokio::test]
    async fn partial_line_is_flushed_before_the_rest_arrives() {
        let reader = (&b"Password: "[..]).chain(&b"ok\n"[..]);
        let got = collect(reader).await;
        assert_eq!(got, vec!["Password: ", "ok\n"]);
    }

    #[tokio::test]
    async fn split_utf8_sequence_is_held_back() {
        let reader = (&b"caf\xc3"[..]).chain(&b"\xa9\n"[..]);
        let got = collect(reader).await;
        assert_eq!(got, vec!["caf", "\u{e9}\n"]);
    }

    #[test]
    fn utf8_boundary_stops_before_incomplete_tail() {
        assert_eq!(utf8_boundary(b"ab"), 2);
        assert_eq!(utf8_boundary(b"ab\xe2\x82"), 2);
        // Invalid bytes are not waited on; lossy decoding replaces them.
        assert_eq!(utf8_boundary(b"a\xffb"), 3);
    }
}
