//! Operator acknowledgement of hardware-change instructions.

use std::io::{self, BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

/// How a hardware-change prompt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckOutcome {
    /// The operator confirmed the change.
    Acknowledged,
    /// The timeout elapsed; the change stays pending.
    TimedOut,
    /// The session was interrupted or input closed.
    Cancelled,
}

/// Blocks until the operator confirms a hardware change.
pub trait Acknowledger: Send {
    /// Show `instruction` and wait. `None` waits until acknowledged or
    /// `stop` is raised.
    fn acknowledge(
        &mut self,
        instruction: &str,
        timeout: Option<Duration>,
        stop: &AtomicBool,
    ) -> AckOutcome;
}

impl<T: Acknowledger + ?Sized> Acknowledger for Box<T> {
    fn acknowledge(
        &mut self,
        instruction: &str,
        timeout: Option<Duration>,
        stop: &AtomicBool,
    ) -> AckOutcome {
        (**self).acknowledge(instruction, timeout, stop)
    }
}

/// Granularity of stop-flag checks while waiting.
const POLL_SLICE: Duration = Duration::from_millis(200);

/// Waits for a line on an input stream (stdin for interactive runs).
///
/// The stream is read on a background thread so the wait can time out or be
/// cancelled. Prompts go to stderr unless redirected, keeping stdout free
/// for command output.
pub struct LineAcknowledger {
    lines: Receiver<String>,
    prompt: Box<dyn Write + Send>,
}

impl LineAcknowledger {
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        Self {
            lines: rx,
            prompt: Box::new(io::stderr()),
        }
    }

    fn show_prompt(&mut self, instruction: &str) -> io::Result<()> {
        writeln!(self.prompt, "USER ACTION NEEDED: {}", instruction)?;
        writeln!(self.prompt, "Press Enter when hardware changes are complete...")?;
        self.prompt.flush()
    }

    /// Write prompts to `writer` instead of stderr.
    pub fn with_prompt_writer<W>(mut self, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.prompt = Box::new(writer);
        self
    }

    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(io::stdin()))
    }
}

impl Acknowledger for LineAcknowledger {
    fn acknowledge(
        &mut self,
        instruction: &str,
        timeout: Option<Duration>,
        stop: &AtomicBool,
    ) -> AckOutcome {
        if let Err(e) = self.show_prompt(instruction) {
            tracing::warn!("could not show hardware change prompt: {}", e);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if stop.load(Ordering::SeqCst) {
                return AckOutcome::Cancelled;
            }

            let slice = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return AckOutcome::TimedOut;
                    }
                    left.min(POLL_SLICE)
                }
                None => POLL_SLICE,
            };

            match self.lines.recv_timeout(slice) {
                Ok(_) => return AckOutcome::Acknowledged,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("operator input closed");
                    return AckOutcome::Cancelled;
                }
            }
        }
    }
}

/// Accepts every instruction immediately. For unattended runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoAcknowledger;

impl Acknowledger for AutoAcknowledger {
    fn acknowledge(
        &mut self,
        instruction: &str,
        _timeout: Option<Duration>,
        _stop: &AtomicBool,
    ) -> AckOutcome {
        tracing::info!(instruction, "hardware change auto-acknowledged");
        AckOutcome::Acknowledged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Reader that never yields a line until dropped.
    struct Silent;

    impl Read for Silent {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_secs(3600));
            Ok(0)
        }
    }

    #[test]
    fn test_line_acknowledges() {
        let mut ack = LineAcknowledger::from_reader(Cursor::new(b"\n".to_vec()));
        let stop = AtomicBool::new(false);

        let outcome = ack.acknowledge(
            "Connect light sensor to A1",
            Some(Duration::from_secs(5)),
            &stop,
        );
        assert_eq!(outcome, AckOutcome::Acknowledged);
    }

    #[test]
    fn test_prompt_goes_to_prompt_writer() {
        let buf = SharedBuf::default();
        let mut ack = LineAcknowledger::from_reader(Cursor::new(b"\n".to_vec()))
            .with_prompt_writer(buf.clone());
        let stop = AtomicBool::new(false);

        ack.acknowledge("Connect PIR to D2", Some(Duration::from_secs(5)), &stop);

        let shown = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            shown,
            "USER ACTION NEEDED: Connect PIR to D2\nPress Enter when hardware changes are complete...\n"
        );
    }

    #[test]
    fn test_line_times_out() {
        let mut ack = LineAcknowledger::from_reader(BufReader::new(Silent));
        let stop = AtomicBool::new(false);

        let started = Instant::now();
        let outcome =
            ack.acknowledge("Connect PIR to D2", Some(Duration::from_millis(50)), &stop);
        assert_eq!(outcome, AckOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_line_cancelled_by_stop() {
        let mut ack = LineAcknowledger::from_reader(BufReader::new(Silent));
        let stop = AtomicBool::new(true);
        assert_eq!(ack.acknowledge("x", None, &stop), AckOutcome::Cancelled);
    }

    #[test]
    fn test_closed_input_cancels() {
        let mut ack = LineAcknowledger::from_reader(Cursor::new(Vec::new()));
        let stop = AtomicBool::new(false);
        assert_eq!(ack.acknowledge("x", None, &stop), AckOutcome::Cancelled);
    }

    #[test]
    fn test_auto_acknowledger() {
        let stop = AtomicBool::new(true);
        assert_eq!(
            AutoAcknowledger.acknowledge("anything", None, &stop),
            AckOutcome::Acknowledged
        );
    }
}
