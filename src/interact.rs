//! Interaction loop: prompts, responses, and completion flushing.
//!
//! Consumes the ingestion thread's event stream in order. Prompts block on
//! the prompt sink (the operator takes as long as they take; the producer
//! keeps buffering meanwhile), responses go back over the transport, and
//! their semantic meaning is forwarded to the ingestion thread as commands.
//! Completion events arrive carrying their record buffers by value and are
//! flushed to the plot sink exactly once.

use crossbeam_channel::{Receiver, Sender};

use crate::ingest::{HostCommand, HostEvent};
use crate::measurement::{Aggregation, MeasurementRecord, Mode};
use crate::protocol::{COUNT_PROMPT, MODE_PROMPT};
use crate::serial_link::LineSink;
use crate::sinks::{PlotSink, PromptSink};

pub struct InteractLoop<W, P, V> {
    events: Receiver<HostEvent>,
    commands: Sender<HostCommand>,
    /// Transport writer for operator responses.
    writer: W,
    prompts: P,
    plots: V,
}

impl<W, P, V> InteractLoop<W, P, V>
where
    W: LineSink,
    P: PromptSink,
    V: PlotSink,
{
    pub fn new(
        events: Receiver<HostEvent>,
        commands: Sender<HostCommand>,
        writer: W,
        prompts: P,
        plots: V,
    ) -> Self {
        Self {
            events,
            commands,
            writer,
            prompts,
            plots,
        }
    }

    /// Run until the ingestion thread signals shutdown or drops its end of
    /// the channel.
    pub fn run(mut self) {
        loop {
            match self.events.recv() {
                Ok(HostEvent::Prompt(prompt)) => self.on_prompt(&prompt),
                Ok(HostEvent::SingleSweepComplete { records, mode }) => {
                    log::info!("single sweep complete, plotting {} points", records.len());
                    self.plot(&records, mode, Aggregation::Raw);
                }
                Ok(HostEvent::RangeSweepComplete { records, mode }) => {
                    log::info!("range sweep complete with {} points", records.len());
                    let aggregation = self.choose_aggregation();
                    self.plot(&records, mode, aggregation);
                }
                Ok(HostEvent::Disconnected) | Err(_) => {
                    log::info!("event stream closed, stopping interaction loop");
                    break;
                }
            }
        }
    }

    /// Solicit a response, send it to the device, and derive any state
    /// changes the answer implies.
    fn on_prompt(&mut self, prompt: &str) {
        let answer = match self.prompts.solicit(prompt) {
            Ok(answer) => answer,
            Err(e) => {
                log::error!("prompt sink failed, leaving the device waiting: {e}");
                return;
            }
        };

        // The ingestion thread must see the answer's meaning before the
        // device can emit anything that depends on it, so the command goes
        // out ahead of the response write.
        if prompt.contains(MODE_PROMPT) {
            let mode = Mode::from_menu_answer(&answer);
            self.send_command(HostCommand::ModeSelected(mode));
        } else if prompt.contains(COUNT_PROMPT) {
            match answer.trim().parse::<u32>() {
                Ok(increments) => self.send_command(HostCommand::ArmSweep(increments)),
                Err(_) => {
                    log::warn!(
                        "measurement count {:?} is not an integer; the device will re-prompt",
                        answer.trim()
                    );
                }
            }
        }

        if let Err(e) = self.writer.write_line(answer.trim()) {
            log::error!("failed to send response to the device: {e}");
        }
    }

    /// Ask the operator for the range-sweep presentation, re-asking until
    /// the answer is one of `avg`/`ind`.
    fn choose_aggregation(&mut self) -> Aggregation {
        loop {
            match self.prompts.solicit("Plotting options (avg/ind):") {
                Ok(answer) => match Aggregation::from_answer(&answer) {
                    Some(aggregation) => return aggregation,
                    None => log::error!("invalid choice {:?}, enter 'avg' or 'ind'", answer.trim()),
                },
                Err(e) => {
                    log::error!("prompt sink failed, defaulting to raw view: {e}");
                    return Aggregation::Raw;
                }
            }
        }
    }

    fn plot(&mut self, records: &[MeasurementRecord], mode: Mode, aggregation: Aggregation) {
        if let Err(e) = self.plots.plot(records, mode, aggregation) {
            log::error!("plot sink failed: {e}");
        }
    }

    fn send_command(&self, command: HostCommand) {
        if self.commands.send(command).is_err() {
            log::warn!("ingestion loop is gone, command dropped");
        }
    }
}
