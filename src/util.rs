//! Process execution and file editing helpers used by task bodies.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use regex::Regex;

use crate::{vlog_debug, vlog_trace, vlog_warn, Error, Result};

/// Run a command, logging its output, and fail on a non-zero exit.
///
/// Returns stdout split into lines.
pub fn log_check_call<S: AsRef<str>>(args: &[S]) -> Result<Vec<String>> {
    run(args, &[], None)
}

/// Like [`log_check_call`], feeding `input` to the command's stdin.
pub fn log_check_call_with_input<S: AsRef<str>>(args: &[S], input: &str) -> Result<Vec<String>> {
    run(args, &[], Some(input))
}

/// Run a command inside `root` through chroot.
pub fn chroot<S: AsRef<str>>(root: &Path, args: &[S]) -> Result<Vec<String>> {
    let mut full = vec!["chroot".to_string(), root.display().to_string()];
    full.extend(args.iter().map(|a| a.as_ref().to_string()));
    run(&full, &[("DEBIAN_FRONTEND", "noninteractive")], None)
}

fn run<S: AsRef<str>>(
    args: &[S],
    env: &[(&str, &str)],
    input: Option<&str>,
) -> Result<Vec<String>> {
    let command_line = args
        .iter()
        .map(|a| a.as_ref())
        .collect::<Vec<_>>()
        .join(" ");
    let (program, rest) = args
        .split_first()
        .ok_or_else(|| Error::Validation("Command cannot be empty".to_string()))?;

    vlog_debug!("Executing: {}", command_line);
    let mut command = Command::new(program.as_ref());
    command
        .args(rest.iter().map(|a| a.as_ref()))
        .envs(env.iter().copied())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    let mut child = command.spawn()?;
    if let Some(input) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes())?;
        }
    }
    let output = child.wait_with_output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stdout.lines() {
        vlog_trace!("{}", line);
    }
    for line in stderr.lines() {
        vlog_trace!("stderr: {}", line);
    }

    if !output.status.success() {
        vlog_warn!("Command failed: {} ({})", command_line, output.status);
        return Err(Error::Command {
            command: command_line,
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(stdout.lines().map(str::to_string).collect())
}

/// Replace every match of `pattern` in a file, line by line.
///
/// Returns the number of lines changed.
pub fn sed_i(path: &Path, pattern: &str, replacement: &str) -> Result<usize> {
    let re = Regex::new(pattern)?;
    let content = std::fs::read_to_string(path)?;
    let mut changed = 0;
    let mut edited = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        let (body, newline) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };
        let replaced = re.replace_all(body, replacement);
        if replaced != body {
            changed += 1;
        }
        edited.push_str(&replaced);
        edited.push_str(newline);
    }
    if changed > 0 {
        std::fs::write(path, edited)?;
    }
    vlog_debug!("sed_i {} '{}': {} lines changed", path.display(), pattern, changed);
    Ok(changed)
}

/// Commands from `commands` that cannot be found on `PATH`.
pub fn missing_commands<'a, I>(commands: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    commands
        .into_iter()
        .filter(|command| which::which(command.as_str()).is_err())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_check_call_returns_stdout_lines() {
        let lines = log_check_call(&["printf", "one\\ntwo\\n"]).unwrap();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_log_check_call_nonzero_exit_is_command_error() {
        let result = log_check_call(&["sh", "-c", "echo broken >&2; exit 3"]);
        match result {
            Err(Error::Command { command, stderr, .. }) => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(stderr, "broken");
            }
            other => panic!("Expected command error, got {:?}", other),
        }
    }

    #[test]
    fn test_log_check_call_empty_is_rejected() {
        let empty: [&str; 0] = [];
        assert!(matches!(log_check_call(&empty), Err(Error::Validation(_))));
    }

    #[test]
    fn test_log_check_call_with_input() {
        let lines = log_check_call_with_input(&["cat"], "root:secret\n").unwrap();
        assert_eq!(lines, vec!["root:secret"]);
    }

    #[test]
    fn test_sed_i_replaces_matching_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grub");
        std::fs::write(
            &path,
            "GRUB_DEFAULT=0\n#GRUB_TERMINAL=console\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet\"\n",
        )
        .unwrap();

        let changed = sed_i(&path, "^#GRUB_TERMINAL=console", "GRUB_TERMINAL=console").unwrap();
        assert_eq!(changed, 1);

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "GRUB_DEFAULT=0\nGRUB_TERMINAL=console\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet\"\n"
        );
    }

    #[test]
    fn test_sed_i_no_match_leaves_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "127.0.0.1 localhost").unwrap();
        assert_eq!(sed_i(&path, "^nothing$", "x").unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "127.0.0.1 localhost");
    }

    #[test]
    fn test_sed_i_invalid_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, "x").unwrap();
        assert!(matches!(sed_i(&path, "(", "y"), Err(Error::Regex(_))));
    }

    #[test]
    fn test_missing_commands() {
        let commands = vec![
            "sh".to_string(),
            "vmstrap-definitely-not-a-command".to_string(),
        ];
        assert_eq!(
            missing_commands(&commands),
            vec!["vmstrap-definitely-not-a-command".to_string()]
        );
    }
}
