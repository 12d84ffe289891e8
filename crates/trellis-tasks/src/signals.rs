//! Exit code classification for test processes
//!
//! A process killed by signal `N` is recorded with exit code `-N`.

/// Synthetic exit code for a test process that could not be started
pub const SPAWN_FAILURE: i32 = 255;

/// Exit code of a process terminated by the user-interrupt signal
pub const INTERRUPTED: i32 = -2;

const SIGNAL_NAMES: [(i32, &str); 30] = [
    (-1, "SIGHUP"),
    (-2, "SIGINT"),
    (-3, "SIGQUIT"),
    (-4, "SIGILL"),
    (-5, "SIGTRAP"),
    (-6, "SIGABRT"),
    (-7, "SIGBUS"),
    (-8, "SIGFPE"),
    (-9, "SIGKILL"),
    (-10, "SIGUSR1"),
    (-11, "SIGSEGV"),
    (-12, "SIGUSR2"),
    (-13, "SIGPIPE"),
    (-14, "SIGALRM"),
    (-15, "SIGTERM"),
    (-17, "SIGCHLD"),
    (-18, "SIGCONT"),
    (-19, "SIGSTOP"),
    (-20, "SIGTSTP"),
    (-21, "SIGTTIN"),
    (-22, "SIGTTOU"),
    (-23, "SIGURG"),
    (-24, "SIGXCPU"),
    (-25, "SIGXFSZ"),
    (-26, "SIGVTALRM"),
    (-27, "SIGPROF"),
    (-28, "SIGWINCH"),
    (-29, "SIGIO"),
    (-30, "SIGPWR"),
    (-31, "SIGSYS"),
];

/// Name of the signal behind a negative exit code
pub fn signal_name(exit_code: i32) -> Option<&'static str> {
    SIGNAL_NAMES
        .iter()
        .find(|(code, _)| *code == exit_code)
        .map(|(_, name)| *name)
}

/// Short result label: `SUCCESS`, a signal name, or `FAILED`
pub fn result_label(exit_code: i32) -> &'static str {
    if exit_code == 0 {
        "SUCCESS"
    } else {
        signal_name(exit_code).unwrap_or("FAILED")
    }
}

/// Human-readable description of an exit code
pub fn describe_exit(exit_code: i32) -> String {
    match exit_code {
        0 => "passed".to_string(),
        SPAWN_FAILURE => format!("exit code {} (could not start?)", SPAWN_FAILURE),
        code if code < 0 => match signal_name(code) {
            Some(name) => format!("killed by {}", name),
            None => format!("killed by signal {}", -code),
        },
        code => format!("exit code {}", code),
    }
}

/// Exit code of a finished process, signals mapped to negative numbers
pub fn exit_code_of(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    SPAWN_FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_is_named() {
        assert_eq!(signal_name(-9), Some("SIGKILL"));
        assert!(describe_exit(-9).contains("KILL"));
    }

    #[test]
    fn test_result_labels() {
        assert_eq!(result_label(0), "SUCCESS");
        assert_eq!(result_label(1), "FAILED");
        assert_eq!(result_label(-11), "SIGSEGV");
        assert_eq!(result_label(-16), "FAILED");
    }

    #[test]
    fn test_describe_exit() {
        assert_eq!(describe_exit(0), "passed");
        assert_eq!(describe_exit(3), "exit code 3");
        assert_eq!(describe_exit(-64), "killed by signal 64");
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_of_signaled_process() {
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg("kill -9 $$")
            .status()
            .unwrap();
        assert_eq!(exit_code_of(&status), -9);
    }
}
