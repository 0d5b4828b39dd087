//! Line-toggle contact simulator.
//!
//! Used when no pin hardware can be acquired. Every line read flips the mock
//! contact state; `exit` or end of input closes the simulator.

use super::{ChangeSink, InputSource, SourceKind, SourceState, StateCell};
use log::{debug, error, info};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const PROMPT: &str = "Press Enter to toggle the mock contact state. Type 'exit' to quit.\n> ";

/// Line that ends the simulator, compared trimmed and case-insensitively.
const TERMINATOR: &str = "exit";

/// Builder for the console simulator over any buffered reader.
pub struct Console<R> {
    reader: R,
    prompt: bool,
}

impl Console<BufReader<Stdin>> {
    /// Interactive simulator on the process stdin, with prompt.
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin())).with_prompt(true)
    }
}

impl<R> Console<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            prompt: false,
        }
    }

    pub fn with_prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    /// Spawn the reader task on `tracker` and return its handle.
    pub fn start(self, sink: ChangeSink<bool>, tracker: &TaskTracker) -> ConsoleInput {
        let state = Arc::new(StateCell::new());
        let cancel = CancellationToken::new();
        state.start();
        info!("[Sim] Mock contact input active");

        tracker.spawn(read_lines(
            self.reader,
            self.prompt,
            sink,
            state.clone(),
            cancel.clone(),
        ));

        ConsoleInput { state, cancel }
    }
}

async fn read_lines<R>(
    reader: R,
    prompt: bool,
    sink: ChangeSink<bool>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut contact = false;

    loop {
        if prompt {
            print!("{}", PROMPT);
            let _ = std::io::stdout().flush();
        }

        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("[Sim] Reader cancelled");
                return;
            }
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) if !line.trim().eq_ignore_ascii_case(TERMINATOR) => {
                if !state.is_watching() {
                    return;
                }
                contact = !contact;
                info!(
                    "[Sim] Mock state changed to {}.",
                    if contact { "OPEN" } else { "CLOSED" }
                );
                sink.emit(contact);
            }
            Ok(_) => break,
            Err(e) => {
                error!("[Sim] Failed to read input: {}", e);
                break;
            }
        }
    }

    state.stop();
    info!("[Sim] Mock input closed.");
}

/// Handle to a running console simulator.
pub struct ConsoleInput {
    state: Arc<StateCell>,
    cancel: CancellationToken,
}

impl InputSource for ConsoleInput {
    fn kind(&self) -> SourceKind {
        SourceKind::Console
    }

    fn state(&self) -> SourceState {
        self.state.get()
    }

    fn stop(&mut self) {
        if self.state.stop() {
            debug!("[Sim] Stopping mock input");
        }
        self.cancel.cancel();
    }
}
