// src/engine_controller.rs
//
// Engine-side command processor.
//
// Applies control commands to the engine's instruments between periods
// and renders periods on behalf of the audio thread.

use std::path::Path;

use log::{error, info};

use crate::engine::Engine;
use crate::instrument::Instrument;
use crate::parameter::{ParamValue, Parameter};
use crate::state::{Command, CommandResult};

/// Owns the engine and answers [`Command`]s addressed to it.
///
/// This runs on the audio thread; commands are applied between periods,
/// never while one renders.
pub struct EngineController {
    engine: Engine,
}

impl EngineController {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn into_engine(self) -> Engine {
        self.engine
    }

    /// Apply one command and describe the outcome.
    pub fn handle(&mut self, command: &Command) -> CommandResult {
        match command {
            // ═════════════════════════════════════════════════════════════
            // Parameters
            // ═════════════════════════════════════════════════════════════
            Command::ListParams => CommandResult::text(self.list_params()),

            Command::GetParam { path } => {
                let (instrument, param) = match self.resolve(path) {
                    Ok(found) => found,
                    Err(message) => return CommandResult::Error { message },
                };
                match instrument.parameters().get(param) {
                    Some(p) => CommandResult::text(p.format_value()),
                    None => CommandResult::error(format!("Parameter '{param}' not found")),
                }
            }

            Command::SetParam { path, value } => {
                let Some((name, param)) = path.split_once('.') else {
                    return CommandResult::error("Invalid parameter specification");
                };
                let Some(instrument) = self.engine.instrument_mut(name) else {
                    return CommandResult::error(format!("No instrument '{name}'"));
                };
                let value = match value.trim().parse::<f32>() {
                    Ok(number) => ParamValue::Number(number),
                    Err(_) => ParamValue::Text(value.trim().to_string()),
                };
                match instrument.set_parameter(param, value) {
                    Ok(()) => CommandResult::Ok,
                    Err(e) => CommandResult::error(e),
                }
            }

            Command::ResetParams => {
                for instrument in self.engine.instruments_mut() {
                    instrument.reset_parameters();
                }
                CommandResult::Ok
            }

            // ═════════════════════════════════════════════════════════════
            // Persistence
            // ═════════════════════════════════════════════════════════════
            Command::SaveParams { file } => self.save_params(file.as_deref()),

            Command::LoadParams { file } => self.load_params(file.as_deref()),

            // ═════════════════════════════════════════════════════════════
            // Diagnostics
            // ═════════════════════════════════════════════════════════════
            Command::DumpDot => {
                let mut instruments: Vec<&Instrument> = self.engine.instruments().iter().collect();
                instruments.sort_by(|a, b| a.name().cmp(b.name()));
                let text = instruments
                    .into_iter()
                    .map(Instrument::dump_dot)
                    .collect::<Vec<_>>()
                    .join("\n");
                CommandResult::text(text)
            }
        }
    }

    /// Split `instrument.param` and find the instrument.
    fn resolve<'a, 'p>(&'a self, path: &'p str) -> Result<(&'a Instrument, &'p str), String> {
        let (name, param) = path
            .split_once('.')
            .ok_or_else(|| "Invalid parameter specification".to_string())?;
        let instrument = self
            .engine
            .instrument(name)
            .ok_or_else(|| format!("No instrument '{name}'"))?;
        Ok((instrument, param))
    }

    /// One line per unlocked parameter, sorted by instrument then path.
    fn list_params(&self) -> String {
        let mut instruments: Vec<&Instrument> = self.engine.instruments().iter().collect();
        instruments.sort_by(|a, b| a.name().cmp(b.name()));

        let mut lines = Vec::new();
        for instrument in instruments {
            for (path, param) in instrument.parameters().iter().filter(|(_, p)| !p.is_locked()) {
                lines.push(describe(instrument.name(), path, param));
            }
        }
        lines.join("\n")
    }

    /// Every instrument into one file when `file` is given, truncating it
    /// once; otherwise each into its own configured file.
    ///
    /// A failing instrument is logged and skipped; the others are still saved.
    fn save_params(&self, file: Option<&Path>) -> CommandResult {
        let mut failures = Vec::new();
        for (i, instrument) in self.engine.instruments().iter().enumerate() {
            let append = file.is_some() && i > 0;
            if let Err(e) = instrument.save_parameters(file, append) {
                error!(target: "engine", "Cannot save '{}': {e}", instrument.name());
                failures.push(format!("{}: {e}", instrument.name()));
            }
        }
        if failures.is_empty() {
            CommandResult::Ok
        } else {
            CommandResult::error(failures.join("; "))
        }
    }

    fn load_params(&mut self, file: Option<&Path>) -> CommandResult {
        let mut applied = 0;
        let mut failures = Vec::new();
        for instrument in self.engine.instruments_mut() {
            match instrument.load_parameters(file) {
                Ok(n) => applied += n,
                Err(e) => {
                    error!(target: "engine", "Cannot load '{}': {e}", instrument.name());
                    failures.push(format!("{}: {e}", instrument.name()));
                }
            }
        }
        info!(target: "engine", "Restored {applied} parameter values");
        if failures.is_empty() {
            CommandResult::text(applied.to_string())
        } else {
            CommandResult::error(failures.join("; "))
        }
    }
}

/// `inst.path,value,NUMBER,min,max,step,description` or
/// `inst.path,value,CHOICE,a;b;c,description`.
fn describe(instrument: &str, path: &str, param: &Parameter) -> String {
    let kind = if param.is_choice() {
        format!("CHOICE,{}", param.choices().join(";"))
    } else {
        format!("NUMBER,{:.3},{:.3},{:.3}", param.min(), param.max(), param.step())
    };
    format!(
        "{instrument}.{path},{},{kind},{}",
        param.format_value(),
        param.description()
    )
}
