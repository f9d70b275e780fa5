//! Best-effort termination of a process and everything it spawned.

use std::collections::{HashMap, VecDeque};

/// All descendants of `root` in the `(pid, ppid)` table, deepest first.
pub(crate) fn descendants(table: &[(u32, u32)], root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, ppid) in table {
        if pid != ppid {
            children.entry(ppid).or_default().push(pid);
        }
    }

    // Breadth-first walk, reversed so leaves are signalled before their parents.
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                if kid != root && !order.contains(&kid) {
                    order.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }
    order.reverse();
    order
}

/// Parse `ps -A -o pid= -o ppid=` output into `(pid, ppid)` pairs.
#[cfg(unix)]
fn parse_ps_table(out: &str) -> Vec<(u32, u32)> {
    out.lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let pid = cols.next()?.parse().ok()?;
            let ppid = cols.next()?.parse().ok()?;
            Some((pid, ppid))
        })
        .collect()
}

#[cfg(unix)]
fn process_table() -> Vec<(u32, u32)> {
    match std::process::Command::new("ps")
        .args(["-A", "-o", "pid=", "-o", "ppid="])
        .output()
    {
        Ok(out) => parse_ps_table(&String::from_utf8_lossy(&out.stdout)),
        Err(e) => {
            tracing::debug!("ps failed, only the process group will be signalled: {e}");
            Vec::new()
        }
    }
}

/// Send SIGTERM to every descendant of `pid`, then `pid`, then its process group.
#[cfg(unix)]
pub(crate) fn kill_tree(pid: u32) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    // pid 0 and negative values address process groups, including our own.
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if raw <= 0 {
        return;
    }

    let table = process_table();
    for child in descendants(&table, pid) {
        if let Ok(child) = i32::try_from(child) {
            let _ = kill(Pid::from_raw(child), Signal::SIGTERM);
        }
    }

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(err) => tracing::debug!(pid, "failed to signal process: {err}"),
    }
    // Children are spawned as group leaders, so this catches stragglers that
    // reparented before the table was read.
    let _ = killpg(Pid::from_raw(raw), Signal::SIGTERM);
}

#[cfg(not(unix))]
pub(crate) fn kill_tree(pid: u32) {
    let res = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    if let Err(err) = res {
        tracing::debug!(pid, "taskkill failed: {err}");
    }
}
