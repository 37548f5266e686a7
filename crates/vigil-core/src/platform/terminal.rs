use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, PoisonError};

use crate::alarm::{NotificationChannel, SpeechChannel, Tone, ToneChannel};
use crate::wake_lock::{WakeLockProvider, WakeLockToken};

/// Locate an executable on `PATH`
#[must_use]
pub fn find_program(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn first_available(candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().find_map(|name| find_program(name))
}

fn spawn_quiet(program: &Path, args: &[&str]) -> Result<Child> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program.display()))
}

/// Speech through `say`, `spd-say` or `espeak`.
///
/// Each phrase runs as a child process; cancelling kills it. `spd-say` hands
/// text to speech-dispatcher, so it runs with `--wait` and cancelling also
/// flushes the dispatcher queue.
pub struct SpokenAlert {
    program: PathBuf,
    child: Option<Child>,
}

impl SpokenAlert {
    #[must_use]
    pub fn detect() -> Option<Self> {
        let program = first_available(&["say", "spd-say", "espeak-ng", "espeak"])?;
        log::debug!("Using {} for speech", program.display());
        Some(Self::new(program))
    }

    fn new(program: PathBuf) -> Self {
        Self {
            program,
            child: None,
        }
    }

    fn is_dispatcher(&self) -> bool {
        self.program.file_name().is_some_and(|name| name == "spd-say")
    }
}

impl SpeechChannel for SpokenAlert {
    fn speak(&mut self, phrase: &str) -> Result<()> {
        let child = if self.is_dispatcher() {
            spawn_quiet(&self.program, &["--wait", phrase])?
        } else {
            spawn_quiet(&self.program, &[phrase])?
        };
        self.child = Some(child);
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_none() {
            child.kill().context("Failed to stop speech")?;
            child.wait()?;
        }
        if self.is_dispatcher() {
            // killing the client leaves queued text with the dispatcher
            spawn_quiet(&self.program, &["--cancel"])?.wait()?;
        }
        Ok(())
    }
}

impl Drop for SpokenAlert {
    fn drop(&mut self) {
        let _ = self.cancel();
    }
}

/// The terminal bell. Pitch and length are up to the terminal.
pub struct TerminalBell;

impl ToneChannel for TerminalBell {
    fn play(&mut self, tone: Tone) -> Result<()> {
        log::debug!("Bell ({} Hz requested)", tone.frequency_hz);
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

/// Quote `text` as an AppleScript string literal
fn applescript_string(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Desktop notifications via `notify-send` or `osascript`.
///
/// The notifier runs in the background; finished children are reaped on the
/// next notification.
pub struct DesktopNotifier {
    program: PathBuf,
    granted: bool,
    running: Vec<Child>,
}

impl DesktopNotifier {
    #[must_use]
    pub fn detect(granted: bool) -> Option<Self> {
        let program = first_available(&["notify-send", "osascript"])?;
        Some(Self::new(program, granted))
    }

    fn new(program: PathBuf, granted: bool) -> Self {
        Self {
            program,
            granted,
            running: Vec::new(),
        }
    }

    fn is_osascript(&self) -> bool {
        self.program.file_name().is_some_and(|name| name == "osascript")
    }

    fn reap(&mut self) {
        self.running.retain_mut(|child| match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if !status.success() {
                    log::warn!("Notifier exited with {status}");
                }
                false
            }
            Err(e) => {
                log::warn!("Failed to check notifier: {e}");
                false
            }
        });
    }
}

impl NotificationChannel for DesktopNotifier {
    fn permission_granted(&self) -> bool {
        self.granted
    }

    fn notify(&mut self, title: &str, body: &str, tag: &str) -> Result<()> {
        self.reap();

        let mut command = Command::new(&self.program);
        if self.is_osascript() {
            let script = format!(
                "display notification {} with title {}",
                applescript_string(body),
                applescript_string(title)
            );
            command.arg("-e").arg(script);
        } else {
            command
                .args(["--app-name=vigil", "--urgency=critical", "-h"])
                .arg(format!("string:x-canonical-private-synchronous:{tag}"))
                .args([title, body]);
        }
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        self.running.push(child);
        Ok(())
    }
}

impl Drop for DesktopNotifier {
    fn drop(&mut self) {
        for mut child in self.running.drain(..) {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Keeps the display awake by holding `caffeinate` or `systemd-inhibit`
/// open for as long as the token lives.
pub struct InhibitWakeLock {
    program: PathBuf,
    args: Vec<&'static str>,
    next_id: u64,
    held: Mutex<Option<(u64, Child)>>,
}

impl InhibitWakeLock {
    #[must_use]
    pub fn detect() -> Option<Self> {
        if let Some(program) = find_program("caffeinate") {
            return Some(Self::new(program, vec!["-d"]));
        }
        find_program("systemd-inhibit").map(|program| {
            Self::new(
                program,
                vec![
                    "--what=idle",
                    "--who=vigil",
                    "--why=Study session in progress",
                    "sleep",
                    "infinity",
                ],
            )
        })
    }

    fn new(program: PathBuf, args: Vec<&'static str>) -> Self {
        Self {
            program,
            args,
            next_id: 0,
            held: Mutex::new(None),
        }
    }
}

impl WakeLockProvider for InhibitWakeLock {
    fn is_supported(&self) -> bool {
        true
    }

    fn request(&mut self) -> Result<WakeLockToken> {
        let child = spawn_quiet(&self.program, &self.args)?;
        self.next_id += 1;
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, mut stale)) = held.replace((self.next_id, child)) {
            let _ = stale.kill();
            let _ = stale.wait();
        }
        Ok(WakeLockToken::new(self.next_id))
    }

    fn is_held(&self, token: &WakeLockToken) -> bool {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        match held.as_mut() {
            Some((id, child)) if *id == token.id() => matches!(child.try_wait(), Ok(None)),
            _ => false,
        }
    }

    fn release(&mut self, token: WakeLockToken) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if held.as_ref().is_some_and(|(id, _)| *id == token.id()) {
            if let Some((_, mut child)) = held.take() {
                child.kill().context("Failed to stop inhibitor")?;
                child.wait()?;
            }
        }
        Ok(())
    }
}

impl Drop for InhibitWakeLock {
    fn drop(&mut self) {
        let held = self.held.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, mut child)) = held.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_program_misses_nonsense() {
        assert!(find_program("vigil-definitely-not-installed").is_none());
    }

    #[test]
    fn test_bell_never_fails() {
        let mut bell = TerminalBell;
        assert!(bell
            .play(Tone {
                frequency_hz: 880,
                duration_ms: 800
            })
            .is_ok());
    }

    #[test]
    fn test_applescript_string_escapes_quotes_and_backslashes() {
        assert_eq!(applescript_string("plain"), "\"plain\"");
        assert_eq!(
            applescript_string(r#"say "hi" \ bye"#),
            r#""say \"hi\" \\ bye""#
        );
        assert_eq!(applescript_string("caf\u{e9}"), "\"caf\u{e9}\"");
    }

    #[cfg(unix)]
    fn fake_program(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_notify_does_not_wait_for_notifier() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_program(dir.path(), "notify-send", "sleep 2");
        let mut notifier = DesktopNotifier::new(program, true);

        let started = std::time::Instant::now();
        notifier.notify("Come back", "Away for 5s.", "vigil-alarm").unwrap();
        notifier.notify("Come back", "Away for 15s.", "vigil-alarm").unwrap();

        assert!(started.elapsed() < std::time::Duration::from_millis(1_000));
        assert_eq!(notifier.running.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_dispatcher_speech_is_flushed_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        // exits at once, like spd-say handing text to the dispatcher
        let program = fake_program(dir.path(), "spd-say", r#"echo "$*" >> "$0.log""#);
        let mut speech = SpokenAlert::new(program.clone());

        speech.speak("first").unwrap();
        if let Some(child) = speech.child.as_mut() {
            child.wait().unwrap();
        }
        speech.cancel().unwrap();
        speech.speak("second").unwrap();
        if let Some(child) = speech.child.as_mut() {
            child.wait().unwrap();
        }

        let log = std::fs::read_to_string(dir.path().join("spd-say.log")).unwrap();
        let calls: Vec<&str> = log.lines().collect();
        assert_eq!(calls, vec!["--wait first", "--cancel", "--wait second"]);
    }

    #[test]
    fn test_cancel_without_speech_is_a_no_op() {
        let mut speech = SpokenAlert::new(PathBuf::from("spd-say"));
        assert!(speech.cancel().is_ok());
    }
}
