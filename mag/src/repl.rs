//! Interactive line loop.
//!
//! The reading thread answers `/pause`, `/resume`, `/stop`, `/cancel` and
//! `/status` immediately so they work while a batch is running. Everything
//! else is queued to a worker thread. While the worker waits for a
//! confirmation, the next input line is routed to it as the answer.

use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::controller::TaskEvent;
use crate::core::control::{ControlCommand, parse_control_command};
use crate::core::execution_state::ExecutionState;
use crate::core::todo::TodoStore;
use crate::io::file_gateway::FileGateway;
use crate::io::llm::LlmBackend;
use crate::io::shell_gateway::ShellGateway;
use crate::session::{Answer, Confirm, Session};

const BANNER: &str = "mag interactive session. Type /help for commands, /quit to exit.";

const HELP: &str = "\
Commands:
  /do all | next | until <id> | <start>-<end> | <id>   execute pending todos
  /pause  /resume  /stop  /cancel                     control a running batch
  /status                                             execution state and counts
  /todo                                               list todos
  /act <request>                                      propose and apply one action
  /claude  /chatgpt  /gemini  /mistral                switch LLM provider
  /quit                                               leave
Anything else is sent to the assistant.";

/// Output shared by the reading thread and the worker.
struct Console<'w, W> {
    out: Mutex<&'w mut W>,
}

impl<W: Write> Console<'_, W> {
    fn line(&self, text: &str) {
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(err) = writeln!(out, "{text}").and_then(|()| out.flush()) {
            warn!(err = %err, "failed to write output");
        }
    }
}

#[derive(Debug, Default)]
struct SlotState {
    waiting: Option<Sender<String>>,
    closed: bool,
}

/// Hand-off point for confirmation answers.
#[derive(Debug, Default)]
pub struct AnswerSlot {
    state: Mutex<SlotState>,
}

impl AnswerSlot {
    fn lock(&self) -> Option<MutexGuard<'_, SlotState>> {
        self.state.lock().ok()
    }

    /// Register a waiter. `None` once input has ended.
    fn wait(&self) -> Option<Receiver<String>> {
        let mut state = self.lock()?;
        if state.closed {
            return None;
        }
        let (tx, rx) = mpsc::channel();
        state.waiting = Some(tx);
        Some(rx)
    }

    /// Give `line` to a waiting confirmation. False when nobody is waiting.
    pub fn deliver(&self, line: &str) -> bool {
        let waiting = self.lock().and_then(|mut state| state.waiting.take());
        waiting.is_some_and(|tx| tx.send(line.to_string()).is_ok())
    }

    pub fn is_waiting(&self) -> bool {
        self.lock().is_some_and(|state| state.waiting.is_some())
    }

    /// Refuse further waits and release the current one.
    pub fn close(&self) {
        if let Some(mut state) = self.lock() {
            state.closed = true;
            state.waiting = None;
        }
    }
}

/// Reads `y`, `yes`, `a`, `always`; anything else declines.
pub fn parse_answer(line: &str) -> Answer {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Answer::Yes,
        "a" | "always" => Answer::Always,
        _ => Answer::No,
    }
}

/// Confirmation that prints the question and waits for the next input line.
pub struct SlotConfirm<'a> {
    slot: &'a AnswerSlot,
    show: &'a (dyn Fn(&str) + Sync),
}

impl<'a> SlotConfirm<'a> {
    pub fn new(slot: &'a AnswerSlot, show: &'a (dyn Fn(&str) + Sync)) -> Self {
        Self { slot, show }
    }
}

impl Confirm for SlotConfirm<'_> {
    fn ask(&self, question: &str) -> Result<Answer> {
        let Some(rx) = self.slot.wait() else {
            return Ok(Answer::No);
        };
        (self.show)(&format!("{question}\nProceed? [y]es / [n]o / [a]lways"));
        Ok(rx.recv().map_or(Answer::No, |line| parse_answer(&line)))
    }
}

fn describe_event(event: &TaskEvent<'_>) -> String {
    match event {
        TaskEvent::Started(task) => {
            format!("[EXECUTE] Starting: {} (ID: {})", task.title, task.id)
        }
        TaskEvent::Completed(task, outcome) => format!(
            "[EXECUTE] Completed: {} (ID: {}) - {}",
            task.title, task.id, outcome.summary
        ),
        TaskEvent::Failed(task, err) => {
            format!("[EXECUTE] Failed: {} (ID: {}): {err:#}", task.title, task.id)
        }
    }
}

/// Run the loop until `/quit` or end of input.
pub fn run<L, F, S, R, W>(session: &Session<L, F, S>, input: R, output: &mut W) -> Result<()>
where
    L: LlmBackend + Sync,
    F: FileGateway + Sync,
    S: ShellGateway + Sync,
    R: BufRead,
    W: Write + Send,
{
    let console = Console {
        out: Mutex::new(output),
    };
    let slot = AnswerSlot::default();
    console.line(BANNER);

    thread::scope(|scope| {
        let (jobs, queue) = mpsc::channel::<String>();
        let worker = scope.spawn(|| work(session, queue, &console, &slot));
        let read = read_lines(session, input, &console, &slot, &jobs);
        slot.close();
        drop(jobs);
        // Nobody is left to resume a paused batch.
        while !worker.is_finished() {
            if session.control().state() == ExecutionState::Paused {
                info!("input closed while paused; stopping batch");
                session.stop();
            }
            thread::sleep(session.config().pause_poll_interval());
        }
        if worker.join().is_err() {
            warn!("worker thread panicked");
        }
        read
    })
}

fn read_lines<L, F, S, R, W>(
    session: &Session<L, F, S>,
    input: R,
    console: &Console<'_, W>,
    slot: &AnswerSlot,
    jobs: &Sender<String>,
) -> Result<()>
where
    L: LlmBackend,
    F: FileGateway,
    S: ShellGateway,
    R: BufRead,
    W: Write,
{
    for line in input.lines() {
        let line = line.context("read input line")?;
        if slot.deliver(&line) {
            continue;
        }
        let trimmed = line.trim();
        match trimmed {
            "" => continue,
            "/quit" | "/exit" => break,
            "/help" => {
                console.line(HELP);
                continue;
            }
            _ => {}
        }
        let immediate = match parse_control_command(trimmed) {
            Some(Ok(ControlCommand::Pause)) => Some(session.pause().to_string()),
            Some(Ok(ControlCommand::Resume)) => Some(session.resume().to_string()),
            Some(Ok(ControlCommand::Stop)) => Some(session.stop().to_string()),
            Some(Ok(ControlCommand::Cancel)) => Some(session.cancel().to_string()),
            Some(Ok(ControlCommand::Status)) => Some(session.status().to_string()),
            Some(Err(err)) => Some(format!("Error: {err:#}")),
            _ => None,
        };
        match immediate {
            Some(text) => console.line(&text),
            None => {
                debug!(line = trimmed, "queued for worker");
                if jobs.send(trimmed.to_string()).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn work<L, F, S, W>(
    session: &Session<L, F, S>,
    queue: Receiver<String>,
    console: &Console<'_, W>,
    slot: &AnswerSlot,
) where
    L: LlmBackend,
    F: FileGateway,
    S: ShellGateway,
    W: Write + Send,
{
    let show = |text: &str| console.line(text);
    let confirm = SlotConfirm::new(slot, &show);
    while let Ok(line) = queue.recv() {
        match handle_line(session, &line, &confirm, console) {
            Ok(text) => console.line(&text),
            Err(err) => console.line(&format!("Error: {err:#}")),
        }
    }
}

fn handle_line<L, F, S, W>(
    session: &Session<L, F, S>,
    line: &str,
    confirm: &dyn Confirm,
    console: &Console<'_, W>,
) -> Result<String>
where
    L: LlmBackend,
    F: FileGateway,
    S: ShellGateway,
    W: Write,
{
    if let Some(command) = parse_control_command(line) {
        let mut observer =
            |event: &TaskEvent<'_>, _: &TodoStore| console.line(&describe_event(event));
        return session.handle_control_command(command?, confirm, &mut observer);
    }

    let mut observer = |event: &TaskEvent<'_>, _: &TodoStore| {
        if let TaskEvent::Started(_) = event {
            console.line(&describe_event(event));
        }
    };
    let outcome = session.chat(line, &mut observer)?;
    let mut text = outcome.text;
    for entry in &outcome.log {
        text.push('\n');
        text.push_str(entry);
    }
    if let Some(suggestion) = &outcome.suggestion {
        text.push_str("\n\n");
        text.push_str(suggestion);
    }
    Ok(text)
}
