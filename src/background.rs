//! EK-PAR - Background Task
//!
//! Runs on the background core, once per tick:
//!
//! 1. Read at most one message from the command mailbox
//! 2. Validate, stage and report every command it carries
//! 3. Run the commit pass (per command or per message, see [`CommitPolicy`])
//!
//! Every outcome is reported as a text line on the status mailbox. Status is
//! a latest-value channel: a reader that falls behind only sees the most
//! recent line.

use crate::command::{self, CommandError, UPDATE_SUCCESS};
use crate::component::{CommitReport, ComponentTree};
use crate::config::{CommitPolicy, PipelineConfig};
use crate::hal::{Hal, Ticker};
use crate::mailbox::{Reader, Writer};
use crate::snapshot::ParameterMap;
use crate::types::*;
use serde_json::Value;

// ============================================================================
// Cycle Report
// ============================================================================

/// Outcome of processing one inbound message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Commands staged successfully
    pub applied: usize,
    /// Commands rejected (schema, version, lookup, type or parse)
    pub failed: usize,
    /// Commit passes run for this message
    pub commit: CommitReport,
}

// ============================================================================
// Parameter Setting
// ============================================================================

/// Command intake: command mailbox in, status mailbox out
pub struct ParameterSetting<'a> {
    commands: Reader<'a>,
    status: Writer<'a>,
    scratch: Vec<u8>,
    command_version: Version,
    commit_policy: CommitPolicy,
}

impl<'a> ParameterSetting<'a> {
    /// Create the intake over an already claimed reader/writer pair
    ///
    /// The receive buffer matches the command mailbox capacity.
    pub fn new(commands: Reader<'a>, status: Writer<'a>, config: &PipelineConfig) -> Self {
        let scratch = vec![0; commands.capacity()];
        Self {
            commands,
            status,
            scratch,
            command_version: config.command_version,
            commit_policy: config.commit_policy,
        }
    }

    /// Handle the pending command message, if any
    ///
    /// Returns `Ok(None)` when nothing was pending. `Busy` leaves the message
    /// pending for the next tick; a message larger than the receive buffer is
    /// dropped and reported.
    pub fn receive_json_command(&mut self, tree: &mut ComponentTree) -> Result<Option<CycleReport>> {
        let parsed = {
            let message = match self.commands.read(&mut self.scratch) {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(None),
                Err(Error::BufferTooSmall { needed, available }) => {
                    self.commands.discard();
                    tracing::warn!(needed, available, "command message dropped");
                    self.report(&CommandError::TooLarge { needed, available }.to_string());
                    return Ok(Some(CycleReport {
                        failed: 1,
                        ..CycleReport::default()
                    }));
                }
                Err(e) => return Err(e),
            };
            let payload = message.payload;
            // C-string senders append NUL terminators
            let end = payload.iter().rposition(|b| *b != 0).map_or(0, |last| last + 1);
            serde_json::from_slice::<Value>(&payload[..end])
        };

        match parsed {
            Ok(commands) => Ok(Some(self.process_json_commands(tree, &commands))),
            Err(e) => {
                tracing::warn!(error = %e, "command message is not JSON");
                self.report(&CommandError::Parse(e.to_string()).to_string());
                Ok(Some(CycleReport {
                    failed: 1,
                    ..CycleReport::default()
                }))
            }
        }
    }

    /// Execute a single command or a batch, in order
    ///
    /// A failing command never stops the rest of the batch.
    pub fn process_json_commands(&mut self, tree: &mut ComponentTree, commands: &Value) -> CycleReport {
        let mut cycle = CycleReport::default();
        for command in command::commands(commands) {
            if self.execute_json_command(tree, command) {
                cycle.applied += 1;
            } else {
                cycle.failed += 1;
            }
            if self.commit_policy == CommitPolicy::PerCommand {
                let commit = self.validate_components(tree);
                cycle.commit.extend(commit);
            }
        }
        if self.commit_policy == CommitPolicy::PerMessage {
            cycle.commit = self.validate_components(tree);
        }
        tracing::debug!(applied = cycle.applied, failed = cycle.failed, "commands processed");
        cycle
    }

    /// Schema and version check, reporting any rejection
    pub fn validate_json_command(&mut self, command: &Value) -> bool {
        match command::validate_json_command(command, self.command_version) {
            Ok(_) => true,
            Err(e) => {
                self.report(&e.to_string());
                false
            }
        }
    }

    /// Validate and stage one command, reporting the outcome
    pub fn execute_json_command(&mut self, tree: &mut ComponentTree, command: &Value) -> bool {
        match command::execute_json_command(tree, command, self.command_version) {
            Ok(_) => {
                self.report(UPDATE_SUCCESS);
                true
            }
            Err(e) => {
                let status = e.to_string();
                tracing::info!(status = %status.trim_end(), "command rejected");
                self.report(&status);
                false
            }
        }
    }

    /// Commit pass, reporting every component rejection
    pub fn validate_components(&mut self, tree: &mut ComponentTree) -> CommitReport {
        let report = tree.validate_components();
        for rejection in &report.rejected {
            self.report(rejection.warning.as_str());
        }
        report
    }

    fn report(&mut self, text: &str) {
        tracing::trace!(status = %text.trim_end(), "status");
        if let Err(e) = self.status.write_bytes(text.as_bytes()) {
            tracing::warn!(error = %e, "status line dropped");
        }
    }
}

// ============================================================================
// Background Task
// ============================================================================

/// Periodic background loop: parameter map at start, then commands per tick
pub struct BackgroundTask<'a> {
    setting: ParameterSetting<'a>,
    parameter_map: ParameterMap<'a>,
    root: ComponentId,
    ticker: Ticker,
}

impl<'a> BackgroundTask<'a> {
    /// Assemble the task for the tree rooted at `root`
    pub fn new(
        setting: ParameterSetting<'a>,
        parameter_map: ParameterMap<'a>,
        root: ComponentId,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            setting,
            parameter_map,
            root,
            ticker: Ticker::new(config.tick_period_us),
        }
    }

    /// Command intake
    pub fn setting(&mut self) -> &mut ParameterSetting<'a> {
        &mut self.setting
    }

    /// Publish the parameter map
    pub fn start(&mut self, tree: &ComponentTree) -> Result<()> {
        self.parameter_map.upload_parameter_map(tree, self.root)?;
        Ok(())
    }

    /// One background iteration
    pub fn tick(&mut self, tree: &mut ComponentTree) -> Result<Option<CycleReport>> {
        self.setting.receive_json_command(tree)
    }

    /// Tick at the configured period while `keep_running` holds
    ///
    /// No error ends the loop: a message the mailbox could not hand over is
    /// retried or reported on a later tick.
    pub fn run<H: Hal>(
        &mut self,
        tree: &mut ComponentTree,
        hal: &H,
        mut keep_running: impl FnMut() -> bool,
    ) {
        tracing::info!(
            period_us = self.ticker.period_us(),
            platform = hal.platform_name(),
            "background task running"
        );
        while keep_running() {
            let missed = self.ticker.wait(hal);
            if missed > 0 {
                tracing::debug!(missed, "background tick overrun");
            }
            match self.tick(tree) {
                Ok(_) => {}
                Err(Error::Busy) => tracing::trace!("command mailbox busy"),
                Err(e) => tracing::warn!(error = %e, "background tick failed"),
            }
        }
    }
}
