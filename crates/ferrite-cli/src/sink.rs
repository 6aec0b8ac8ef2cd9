//! Status sink that streams invocation progress to the terminal.

use async_trait::async_trait;
use console::style;
use ferrite_core::Result;
use ferrite_core::events::{Event, OutputStream};
use ferrite_core::ports::StatusSink;
use tracing::debug;

pub struct ConsoleSink {
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

#[async_trait]
impl StatusSink for ConsoleSink {
    async fn publish(&self, event: Event) -> Result<()> {
        debug!(subject = %event.subject(), "event");
        if !self.verbose {
            return Ok(());
        }
        match &event {
            Event::WorkflowSelected(p) => {
                println!("{} workflow {}", style("▶").cyan(), style(&p.workflow).bold());
            }
            Event::JobRunStarted(p) => {
                println!("{} {}/{}", style("▶").cyan(), p.workflow, style(&p.job).bold());
            }
            Event::JobRunCompleted(p) => {
                let mark = match p.reason {
                    None => style("✓").green(),
                    Some(_) => style("✗").red(),
                };
                match p.reason {
                    None => println!("{} {}/{}", mark, p.workflow, style(&p.job).bold()),
                    Some(reason) => println!(
                        "{} {}/{} ({})",
                        mark,
                        p.workflow,
                        style(&p.job).bold(),
                        reason
                    ),
                }
            }
            Event::JobRunSkipped(p) => {
                println!(
                    "{} {}/{} skipped ({})",
                    style("-").dim(),
                    p.workflow,
                    style(&p.job).bold(),
                    p.reason
                );
            }
            Event::StepOutput(p) => {
                let line = match p.stream {
                    OutputStream::Stdout => p.content.clone(),
                    OutputStream::Stderr => style(&p.content).dim().to_string(),
                };
                println!("    {}", line);
            }
            _ => {}
        }
        Ok(())
    }
}
