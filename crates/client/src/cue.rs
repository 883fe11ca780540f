// Audible cue for incoming chat messages. Best effort only.

use std::io::Write;

use tracing::debug;

pub trait SoundCue: Send + Sync {
    fn play(&self) -> std::io::Result<()>;
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBell;

impl SoundCue for TerminalBell {
    fn play(&self) -> std::io::Result<()> {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SilentCue;

impl SoundCue for SilentCue {
    fn play(&self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Play `cue`, swallowing any failure.
pub fn play_best_effort(cue: &dyn SoundCue) {
    if let Err(error) = cue.play() {
        debug!(error = %error, "sound cue failed");
    }
}
