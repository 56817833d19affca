//! Interactive question loop
//!
//! Reads one line per turn, runs it through the pipeline and prints the
//! refined question, the queries that ran with their responses, and the
//! answer. `exit` in any case, or end of input, ends the session. A failed
//! turn is reported and the loop waits for the next question.

use crate::pipeline::GraphRagPipeline;
use crate::retrieval::RetrievalResult;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::error;

pub const EXIT_COMMAND: &str = "exit";
pub const FAREWELL: &str = "Exiting. Goodbye!";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInput,
    Resolving,
    Retrieving,
    Synthesizing,
    Exiting,
}

/// What the loop should do with one input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Skip,
    Ask(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            Command::Skip
        } else if trimmed.eq_ignore_ascii_case(EXIT_COMMAND) {
            Command::Exit
        } else {
            Command::Ask(trimmed.to_string())
        }
    }
}

pub struct Session<'a> {
    pipeline: &'a GraphRagPipeline,
    state: SessionState,
    turns: usize,
}

impl<'a> Session<'a> {
    pub fn new(pipeline: &'a GraphRagPipeline) -> Self {
        Self {
            pipeline,
            state: SessionState::AwaitingInput,
            turns: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Questions answered or attempted so far
    pub fn turns(&self) -> usize {
        self.turns
    }

    /// Run until `exit` or end of input.
    ///
    /// Waiting for the next line yields to the runtime instead of blocking it.
    pub async fn run<R, W>(&mut self, mut input: R, mut output: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        writeln!(output, "Ask a question about the knowledge graph (type '{}' to quit).", EXIT_COMMAND)?;
        let mut line = String::new();

        while self.state != SessionState::Exiting {
            write!(output, "\nQuestion: ")?;
            output.flush()?;

            line.clear();
            if input.read_line(&mut line).await? == 0 {
                writeln!(output)?;
                self.state = SessionState::Exiting;
                break;
            }

            match Command::parse(&line) {
                Command::Skip => continue,
                Command::Exit => self.state = SessionState::Exiting,
                Command::Ask(question) => self.turn(&question, &mut output).await?,
            }
        }

        writeln!(output, "{}", FAREWELL)?;
        Ok(())
    }

    /// One question through every stage; pipeline errors end the turn, not the loop
    pub async fn turn<W: Write>(&mut self, question: &str, output: &mut W) -> std::io::Result<()> {
        self.turns += 1;

        self.state = SessionState::Resolving;
        let resolved = match self.pipeline.resolve(question).await {
            Ok(resolved) => resolved,
            Err(e) => return self.fail(e, output),
        };
        writeln!(output, "Refined question: {}", resolved.question)?;
        if !resolved.node_ids.is_empty() {
            writeln!(output, "Relevant node IDs: {}", resolved.node_ids.join(", "))?;
        }

        self.state = SessionState::Retrieving;
        let (structured, fallback) = match self.pipeline.retrieve(&resolved).await {
            Ok(results) => results,
            Err(e) => return self.fail(e, output),
        };
        print_result(&structured, output)?;
        if let Some(fallback) = &fallback {
            writeln!(output, "Structured query returned nothing; using graph traversal.")?;
            print_result(fallback, output)?;
        }

        self.state = SessionState::Synthesizing;
        let context = fallback.as_ref().unwrap_or(&structured);
        match self.pipeline.synthesize(&resolved, context).await {
            Ok(answer) => writeln!(output, "\nAnswer: {}", answer)?,
            Err(e) => return self.fail(e, output),
        }

        self.state = SessionState::AwaitingInput;
        Ok(())
    }

    fn fail<W: Write>(&mut self, err: crate::error::RagError, output: &mut W) -> std::io::Result<()> {
        error!(state = ?self.state, "turn failed: {}", err);
        writeln!(output, "Error: {}", err)?;
        self.state = SessionState::AwaitingInput;
        Ok(())
    }
}

fn print_result<W: Write>(result: &RetrievalResult, output: &mut W) -> std::io::Result<()> {
    for fragment in result.fragments() {
        writeln!(output, "{}", fragment.text())?;
    }
    Ok(())
}
