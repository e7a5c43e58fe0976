// PERFHARVEST PROCESS ORCHESTRATOR
// LAUNCHES THE LOAD GENERATOR AND WORKLOAD COMMANDS AROUND ONE CAPTURE
// WINDOW, THEN TERMINATES EVERY ONE OF THEM BEFORE RETURNING.
//
// EVERY CHILD RUNS IN ITS OWN PROCESS GROUP. SIGNALS GO TO THE GROUP SO
// FORKING WORKLOADS (stress-ng WORKERS) DIE WITH THEIR LEADER. THE LEADER
// IS NEVER REAPED BEFORE ITS GROUP IS SWEPT: WHILE IT IS A ZOMBIE THE
// GROUP ID CANNOT BE HANDED TO AN UNRELATED PROCESS.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::LoadProfile;
use crate::error::TrialError;

pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// PROCESS HANDLE
// ---------------------------------------------------------------------------

pub struct ProcessHandle {
    child: Child,
    pid: u32,
    started_at: Instant,
    command: String,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    // STDIN IS ALWAYS /dev/null. THE CHILD GETS SIGTERM IF THE HARNESS DIES.
    pub fn spawn(argv: &[String], stdout: Stdio, stderr: Stdio) -> Result<Self, TrialError> {
        let command = argv.join(" ");
        let (program, args) = argv.split_first().ok_or_else(|| TrialError::Spawn {
            command: command.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty argv"),
        })?;

        let child = unsafe {
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(stdout)
                .stderr(stderr)
                .process_group(0)
                .pre_exec(|| {
                    libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong);
                    Ok(())
                })
                .spawn()
        }
        .map_err(|source| TrialError::Spawn {
            command: command.clone(),
            source,
        })?;

        Ok(Self {
            pid: child.id(),
            child,
            started_at: Instant::now(),
            command,
            status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn is_reaped(&self) -> bool {
        self.status.is_some()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    // NON-BLOCKING. REAPS (AND SWEEPS THE GROUP) ONCE THE LEADER HAS EXITED.
    pub fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        if !self.leader_exited(false)? {
            return Ok(None);
        }
        self.reap().map(Some)
    }

    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        self.leader_exited(true)?;
        self.reap()
    }

    pub fn interrupt(&self) {
        self.signal_group(libc::SIGINT);
    }

    pub fn terminate(&self) {
        self.signal_group(libc::SIGTERM);
    }

    pub fn kill(&self) {
        self.signal_group(libc::SIGKILL);
    }

    // SIGTERM, POLL UNTIL grace, SIGKILL, REAP. NO-OP ONCE REAPED.
    pub fn stop(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        escalate(&mut [&mut *self], grace);
        self.wait()
    }

    fn signal_group(&self, sig: libc::c_int) {
        if self.status.is_some() {
            return;
        }
        // ESRCH (GROUP ALREADY GONE) IS THE EXPECTED RACE, NOT AN ERROR
        unsafe {
            libc::killpg(self.pid as libc::pid_t, sig);
        }
    }

    // waitid(WNOWAIT): OBSERVE THE EXIT WITHOUT RELEASING THE PID
    fn leader_exited(&self, block: bool) -> io::Result<bool> {
        let mut flags = libc::WEXITED | libc::WNOWAIT;
        if !block {
            flags |= libc::WNOHANG;
        }
        loop {
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::waitid(libc::P_PID, self.pid as libc::id_t, &mut info, flags)
            };
            if rc == 0 {
                return Ok(unsafe { info.si_pid() } != 0);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    fn reap(&mut self) -> io::Result<ExitStatus> {
        // LEADER IS A ZOMBIE: KILL WHATEVER IT LEFT BEHIND IN ITS GROUP
        self.signal_group(libc::SIGKILL);
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }
}

// SIGTERM EVERY GROUP STILL RUNNING, POLL UNTIL grace, SIGKILL THE REST.
// REAPING IS LEFT TO THE CALLER.
fn escalate(handles: &mut [&mut ProcessHandle], grace: Duration) {
    for h in handles.iter_mut() {
        if matches!(h.poll(), Ok(None)) {
            h.terminate();
        }
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline && handles.iter_mut().any(|h| matches!(h.poll(), Ok(None))) {
        std::thread::sleep(POLL_INTERVAL);
    }

    for h in handles.iter_mut() {
        if !h.is_reaped() {
            debug!(pid = h.pid, command = %h.command, "still running after grace, SIGKILL");
            h.kill();
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.status.is_none() {
            self.kill();
            let _ = self.wait();
        }
    }
}

// ---------------------------------------------------------------------------
// SCOPED HANDLE SET
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Load,
    Workload,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Self::Load => "LOAD",
            Self::Workload => "WORKLOAD",
        }
    }
}

#[derive(Debug)]
pub struct ReapedProcess {
    pub pid: u32,
    pub role: Role,
    pub command: String,
    pub status: Option<ExitStatus>,
}

// RELEASED EXPLICITLY ON THE NORMAL PATH, BY Drop WHEN body UNWINDS
struct HandleSet {
    handles: Vec<(Role, ProcessHandle)>,
    grace: Duration,
}

impl HandleSet {
    fn new(grace: Duration) -> Self {
        Self { handles: Vec::new(), grace }
    }

    fn launch(&mut self, role: Role, argv: &[String]) -> Result<(), TrialError> {
        let handle = ProcessHandle::spawn(argv, Stdio::null(), Stdio::null())?;
        info!(pid = handle.pid(), role = role.label(), command = %handle.command(), "spawned");
        self.handles.push((role, handle));
        Ok(())
    }

    fn release(&mut self) -> Vec<ReapedProcess> {
        let mut handles = std::mem::take(&mut self.handles);
        {
            let mut live: Vec<&mut ProcessHandle> = handles.iter_mut().map(|(_, h)| h).collect();
            escalate(&mut live, self.grace);
        }

        handles
            .into_iter()
            .map(|(role, mut h)| {
                let status = match h.wait() {
                    Ok(s) => Some(s),
                    Err(e) => {
                        warn!(pid = h.pid(), error = %e, "reap failed");
                        None
                    }
                };
                let runtime = h.started_at().elapsed();
                info!(pid = h.pid(), role = role.label(), ?status, ?runtime, "terminated");
                ReapedProcess {
                    pid: h.pid(),
                    role,
                    command: h.command().to_string(),
                    status,
                }
            })
            .collect()
    }
}

impl Drop for HandleSet {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.release();
        }
    }
}

// ---------------------------------------------------------------------------
// ORCHESTRATOR
// ---------------------------------------------------------------------------

pub struct TrialScope<T> {
    pub outcome: Result<T, TrialError>,
    pub reaped: Vec<ReapedProcess>,
}

pub struct Orchestrator {
    stop_grace: Duration,
}

impl Orchestrator {
    pub fn new(stop_grace: Duration) -> Self {
        Self { stop_grace }
    }

    // NO PROCESS STARTED HERE OUTLIVES THIS CALL: NOT ON SUCCESS, NOT ON
    // ERROR, NOT WHEN body PANICS, NOT WHEN A LATER SPAWN FAILS.
    pub fn run_with_auxiliaries<T, F>(
        &self,
        load: &LoadProfile,
        workloads: &[Vec<String>],
        body: F,
    ) -> TrialScope<T>
    where
        F: FnOnce() -> Result<T, TrialError>,
    {
        let mut set = HandleSet::new(self.stop_grace);
        let outcome = match launch_all(&mut set, load, workloads) {
            Ok(()) => body(),
            Err(e) => {
                warn!(error = %e, "launch aborted, cleaning up {} started process(es)", set.handles.len());
                Err(e)
            }
        };
        let reaped = set.release();
        TrialScope { outcome, reaped }
    }
}

fn launch_all(
    set: &mut HandleSet,
    load: &LoadProfile,
    workloads: &[Vec<String>],
) -> Result<(), TrialError> {
    if let Some(cmd) = &load.command {
        set.launch(Role::Load, cmd)?;
    }
    for argv in workloads {
        set.launch(Role::Workload, argv)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_argv_is_spawn_error() {
        let err = ProcessHandle::spawn(&[], Stdio::null(), Stdio::null()).err().unwrap();
        assert!(matches!(err, TrialError::Spawn { .. }));
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let err = ProcessHandle::spawn(
            &argv(&["/nonexistent/perfharvest-binary"]),
            Stdio::null(),
            Stdio::null(),
        )
        .err()
        .unwrap();
        match err {
            TrialError::Spawn { command, source } => {
                assert_eq!(command, "/nonexistent/perfharvest-binary");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn poll_reports_exit_and_caches_status() {
        let mut h = ProcessHandle::spawn(&argv(&["true"]), Stdio::null(), Stdio::null()).unwrap();
        let status = h.wait().unwrap();
        assert!(status.success());
        assert_eq!(h.poll().unwrap(), Some(status));
        assert!(h.is_reaped());
    }

    #[test]
    fn stop_escalates_when_sigterm_ignored() {
        let mut h = ProcessHandle::spawn(
            &argv(&["sh", "-c", "trap '' TERM; while :; do sleep 0.05; done"]),
            Stdio::null(),
            Stdio::null(),
        )
        .unwrap();
        let t0 = Instant::now();
        let status = h.stop(Duration::from_millis(200)).unwrap();
        assert!(!status.success());
        assert!(t0.elapsed() < Duration::from_secs(5));
    }
}
