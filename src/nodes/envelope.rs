// src/nodes/envelope.rs
//
// Breakpoint envelope generators.

use std::collections::VecDeque;

use crate::error::{BuildError, BuildResult, ProcessingError, ProcessingResult};
use crate::node::{Node, NodeSpec, ProcessContext};
use crate::parameter::{Parameter, ParameterSet};
use crate::state::Attributes;

/// One envelope breakpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    /// Offset from the trigger [s]
    pub time: f32,
    pub level: f32,
    pub sustain: bool,
}

impl Breakpoint {
    pub fn new(time: f32, level: f32) -> Self {
        Self {
            time,
            level,
            sustain: false,
        }
    }

    pub fn sustained(mut self, sustain: bool) -> Self {
        self.sustain = sustain;
        self
    }
}

/// A breakpoint placed on the sample timeline of the current period.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScheduledEvent {
    time: i64,
    level: f32,
    sustain: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopeStage {
    /// Not triggered, or finished
    Idle,
    /// Interpolating towards the next scheduled event
    Running,
    /// Reached the sustain point with the gate still high
    Holding,
}

// ═══════════════════════════════════════════════════════════════════
// Envelope
// ═══════════════════════════════════════════════════════════════════

/// Gate-triggered envelope interpolating linearly between breakpoints.
pub struct Envelope {
    points: Vec<Breakpoint>,
    events: VecDeque<ScheduledEvent>,
    stage: EnvelopeStage,
    sample_rate: f32,
    gate_state: f32,
    level: f64,
    delta: f64,
}

impl Envelope {
    pub fn new(points: Vec<Breakpoint>) -> BuildResult<Self> {
        let points = check_points(points)?;
        let level = points[0].level as f64;
        Ok(Self {
            events: VecDeque::with_capacity(points.len()),
            points,
            stage: EnvelopeStage::Idle,
            sample_rate: 48_000.0,
            gate_state: 0.0,
            level,
            delta: 0.0,
        })
    }

    /// `envelope` module: points come from `point<N>` = `"time,level[,sustain]"` attributes.
    pub fn spec(attributes: &Attributes) -> BuildResult<NodeSpec> {
        let points = parse_points(attributes)?;
        Ok(NodeSpec::new(Self::new(points)?)
            .with_input("gate", 0.0)
            .with_output("out"))
    }

    pub fn points(&self) -> &[Breakpoint] {
        &self.points
    }

    /// Replace the breakpoints. Events already scheduled keep running.
    pub fn set_points(&mut self, points: Vec<Breakpoint>) -> BuildResult<()> {
        self.points = check_points(points)?;
        self.events.reserve(self.points.len());
        Ok(())
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeStage::Idle
    }

    #[inline]
    fn to_samples(&self, seconds: f32) -> i64 {
        (seconds * self.sample_rate).round() as i64
    }

    /// Place breakpoints on the timeline starting at `sample`.
    ///
    /// Attack covers the points up to and including the sustain point.
    /// Release covers the sustain point (or the second to last point) onwards,
    /// timed relative to that first release point.
    fn schedule(&mut self, sample: usize, attack: bool) {
        self.events.clear();

        let (range, origin) = if attack {
            let end = self
                .points
                .iter()
                .position(|p| p.sustain)
                .map_or(self.points.len(), |i| i + 1);
            (0..end, 0.0)
        } else {
            let start = self
                .points
                .iter()
                .position(|p| p.sustain)
                .unwrap_or(self.points.len() - 2);
            (start..self.points.len(), self.points[start].time)
        };

        let mut prev = -1i64;
        for i in range {
            let point = self.points[i];
            let mut time = self.to_samples(point.time - origin) + sample as i64;
            if time <= prev {
                time = prev + 1;
            }
            prev = time;
            self.events.push_back(ScheduledEvent {
                time,
                level: point.level,
                sustain: point.sustain,
            });
        }
    }

    /// Consume the front event and set the slope towards the next one.
    fn next_event(&mut self) -> Option<ScheduledEvent> {
        let current = self.events.pop_front()?;
        self.delta = match self.events.front() {
            Some(next) => (next.level as f64 - self.level) / (next.time - current.time) as f64,
            None => 0.0,
        };
        Some(current)
    }

    /// Stage after consuming `current` with nothing else pending.
    fn settle(&mut self, current: ScheduledEvent) {
        if !self.events.is_empty() {
            self.stage = EnvelopeStage::Running;
        } else if current.sustain {
            self.stage = EnvelopeStage::Holding;
        } else {
            self.stage = EnvelopeStage::Idle;
            self.level = current.level as f64;
        }
    }

    fn trigger_attack(&mut self, sample: usize) {
        self.schedule(sample, true);
        if self.stage == EnvelopeStage::Idle {
            if let Some(first) = self.events.front() {
                self.level = first.level as f64;
            }
        }
        if let Some(current) = self.next_event() {
            self.stage = EnvelopeStage::Running;
            self.settle(current);
        }
    }

    fn trigger_release(&mut self, sample: usize) {
        self.schedule(sample, false);
        if let Some(current) = self.next_event() {
            if self.events.is_empty() {
                self.stage = EnvelopeStage::Idle;
                self.level = current.level as f64;
            } else {
                self.stage = EnvelopeStage::Running;
            }
        }
    }

    fn render(&mut self, gate: &[f32], out: &mut [f32]) -> ProcessingResult<()> {
        let frames = out.len() as i64;
        for ev in self.events.iter_mut() {
            ev.time -= frames;
            if ev.time < 0 {
                return Err(ProcessingError::NegativeEventTime(ev.time));
            }
        }

        let mut prev_gate = self.gate_state;
        for (i, (o, &g)) in out.iter_mut().zip(gate).enumerate() {
            let trigger = g - prev_gate;
            prev_gate = g;

            let at_event = self.stage == EnvelopeStage::Running
                && self.events.front().is_some_and(|ev| ev.time == i as i64);

            if trigger > 0.5 {
                self.trigger_attack(i);
            } else if trigger < -0.5 && self.stage == EnvelopeStage::Holding {
                self.trigger_release(i);
            } else if at_event {
                self.level = self.events.front().map_or(self.level, |ev| ev.level as f64);
                if let Some(current) = self.next_event() {
                    if self.events.is_empty() && current.sustain && g <= 0.5 {
                        self.trigger_release(i);
                    } else {
                        self.settle(current);
                    }
                }
            } else {
                self.level += self.delta;
            }

            *o = self.level as f32;
        }

        self.gate_state = prev_gate;
        Ok(())
    }
}

impl Node for Envelope {
    fn prepare(&mut self, sample_rate: f32, _frames: usize) {
        self.sample_rate = sample_rate;
    }

    fn start(&mut self) {
        self.stop();
        self.events.clear();
        self.level = self.points[0].level as f64;
    }

    fn stop(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.delta = 0.0;
        self.gate_state = 0.0;
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        let gate = ctx.input(0);
        self.render(gate, ctx.output(0))
    }
}

fn check_points(mut points: Vec<Breakpoint>) -> BuildResult<Vec<Breakpoint>> {
    points.sort_by(|a, b| a.time.total_cmp(&b.time));
    if points.len() < 2 {
        return Err(BuildError::InvalidEnvelope("at least two points are required".into()));
    }
    if points.windows(2).any(|w| w[1].time <= w[0].time) {
        return Err(BuildError::InvalidEnvelope("point times must be strictly increasing".into()));
    }
    if points.iter().filter(|p| p.sustain).count() > 1 {
        return Err(BuildError::InvalidEnvelope("at most one sustain point is allowed".into()));
    }
    Ok(points)
}

fn parse_points(attributes: &Attributes) -> BuildResult<Vec<Breakpoint>> {
    let mut points = Vec::new();
    for (key, value) in attributes.iter() {
        let is_point = key
            .strip_prefix("point")
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if !is_point {
            continue;
        }

        let invalid = || BuildError::InvalidAttribute {
            attribute: key.to_string(),
            value: value.to_string(),
        };
        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        let number = |s: &str| s.parse::<f32>().map_err(|_| invalid());
        let point = match fields.as_slice() {
            [t, l] => Breakpoint::new(number(t)?, number(l)?),
            [t, l, s] => {
                let sustain = s.parse::<i32>().map_err(|_| invalid())? != 0;
                Breakpoint::new(number(t)?, number(l)?).sustained(sustain)
            }
            _ => return Err(invalid()),
        };
        points.push(point);
    }
    Ok(points)
}

// ═══════════════════════════════════════════════════════════════════
// ADSR
// ═══════════════════════════════════════════════════════════════════

/// Envelope with breakpoints derived from attack/decay/sustain/release parameters.
pub struct Adsr {
    envelope: Envelope,
}

impl Adsr {
    pub fn spec(_attributes: &Attributes) -> BuildResult<NodeSpec> {
        let (min, max, step) = (-96.0, 0.0, 0.1);
        let mut parameters = ParameterSet::new();
        parameters.insert("attackTime", Parameter::new_number(0.010, 0.001, 0.250, 0.001).describe("Attack time [s]"));
        parameters.insert("decayTime", Parameter::new_number(0.040, 0.001, 0.250, 0.001).describe("Decay time [s]"));
        parameters.insert("sustainTime", Parameter::new_number(0.050, 0.001, 0.500, 0.001).describe("Sustain time [s]"));
        parameters.insert("releaseTime", Parameter::new_number(1.500, 0.001, 5.000, 0.001).describe("Release time [s]"));
        parameters.insert("attackLevel", Parameter::new_number(max, min, max, step).describe("Attack level"));
        parameters.insert("sustainLevel", Parameter::new_number(-6.0, min, max, step).describe("Sustain level"));
        parameters.insert("releaseLevel", Parameter::new_number(min, min, max, step).describe("Release level"));
        parameters.insert("sustainEnable", Parameter::choice(&["no", "yes"], 1).describe("Sustain enable"));

        let envelope = Envelope::new(Self::points(&parameters))?;
        let mut spec = NodeSpec::new(Self { envelope })
            .with_input("gate", 0.0)
            .with_output("out");
        spec.parameters = parameters;
        Ok(spec)
    }

    fn points(params: &ParameterSet) -> Vec<Breakpoint> {
        let attack = params.number("attackTime");
        let decay = attack + params.number("decayTime");
        let sustain = decay + params.number("sustainTime");
        let release = sustain + params.number("releaseTime");
        let sustain_enable = params.index("sustainEnable") == 1;

        vec![
            Breakpoint::new(0.0, params.number("releaseLevel")),
            Breakpoint::new(attack, params.number("attackLevel")),
            Breakpoint::new(decay, params.number("sustainLevel")),
            Breakpoint::new(sustain, params.number("sustainLevel")).sustained(sustain_enable),
            Breakpoint::new(release, params.number("releaseLevel")),
        ]
    }
}

impl Node for Adsr {
    fn prepare(&mut self, sample_rate: f32, frames: usize) {
        self.envelope.prepare(sample_rate, frames);
    }

    fn start(&mut self) {
        self.envelope.start();
    }

    fn stop(&mut self) {
        self.envelope.stop();
    }

    fn parameters_changed(&mut self, params: &ParameterSet) {
        // Every time parameter is at least one step, so times always increase.
        if let Err(e) = self.envelope.set_points(Self::points(params)) {
            log::warn!(target: "adsr", "keeping previous envelope: {}", e);
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext) -> ProcessingResult<()> {
        self.envelope.process(ctx)
    }
}
