//! Interactive command loop
//!
//! One command per line on stdin while the pipeline runs. Commands that take
//! values prompt for whatever was left off the line. A 200 ms tick watches
//! pipeline health so a failure shows up even when nobody is typing.

use std::io::{self, BufRead, Write};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, info, warn};
use serde_json::Value;

use crate::engine::{Pipeline, PipelineHealth, PipelineStatus};

/// Health check interval while waiting for input
const TICK: Duration = Duration::from_millis(200);

/// A complete command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    ToggleDelay,
    DelayTime(f32),
    Feedback(f32),
    Mix { wet: f32, dry: f32 },
    SetParam { effect: String, param: String, value: Value },
    Reset,
    Help,
    Quit,
}

/// Result of feeding one input line
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Command(Command),
    /// More values are needed; show this prompt
    Prompt(&'static str),
    Invalid(String),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    DelayTime,
    Feedback,
    Mix,
    SetParam,
}

impl Kind {
    fn prompts(self) -> &'static [&'static str] {
        match self {
            Kind::DelayTime => &["delay time (ms): "],
            Kind::Feedback => &["feedback (0-0.95): "],
            Kind::Mix => &["wet level (0-1): ", "dry level (0-1): "],
            Kind::SetParam => &["effect id or type: ", "parameter: ", "value: "],
        }
    }
}

/// Line-at-a-time command parser that remembers partially typed commands
#[derive(Debug, Default)]
pub struct CommandReader {
    pending: Option<(Kind, Vec<String>)>,
}

impl CommandReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a command is waiting for more values
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn feed(&mut self, line: &str) -> Step {
        let words = line.split_whitespace().map(str::to_string);

        let (kind, mut args) = match self.pending.take() {
            Some((kind, mut args)) => {
                args.extend(words);
                (kind, args)
            }
            None => {
                let mut words = words;
                let Some(word) = words.next() else {
                    return Step::Empty;
                };
                let kind = match word.to_ascii_lowercase().as_str() {
                    "s" | "status" => return Step::Command(Command::Status),
                    "d" | "delay" => return Step::Command(Command::ToggleDelay),
                    "r" | "reset" => return Step::Command(Command::Reset),
                    "h" | "help" | "?" => return Step::Command(Command::Help),
                    "q" | "quit" | "exit" => return Step::Command(Command::Quit),
                    "t" | "time" => Kind::DelayTime,
                    "f" | "feedback" => Kind::Feedback,
                    "m" | "mix" => Kind::Mix,
                    "p" | "param" | "set" => Kind::SetParam,
                    other => return Step::Invalid(format!("unknown command '{}' (h for help)", other)),
                };
                (kind, words.collect())
            }
        };

        let prompts = kind.prompts();
        if args.len() < prompts.len() {
            let prompt = prompts[args.len()];
            self.pending = Some((kind, args));
            return Step::Prompt(prompt);
        }
        args.truncate(prompts.len());
        build(kind, args)
    }
}

fn number(word: &str) -> Result<f32, Step> {
    word.parse::<f32>()
        .map_err(|_| Step::Invalid(format!("'{}' is not a number", word)))
}

fn build(kind: Kind, args: Vec<String>) -> Step {
    let result = match kind {
        Kind::DelayTime => number(&args[0]).map(Command::DelayTime),
        Kind::Feedback => number(&args[0]).map(Command::Feedback),
        Kind::Mix => number(&args[0]).and_then(|wet| number(&args[1]).map(|dry| Command::Mix { wet, dry })),
        Kind::SetParam => {
            let mut args = args.into_iter();
            let effect = args.next().unwrap_or_default();
            let param = args.next().unwrap_or_default();
            let raw = args.next().unwrap_or_default();
            // bare words such as `cathedral` are taken as strings
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            Ok(Command::SetParam { effect, param, value })
        }
    };
    match result {
        Ok(command) => Step::Command(command),
        Err(step) => step,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run one command against the pipeline
pub fn execute(pipeline: &Pipeline, command: Command) -> Flow {
    match command {
        Command::Status => print_status(&pipeline.status()),
        Command::ToggleDelay => match pipeline.toggle_delay() {
            Some(true) => println!("delay on"),
            Some(false) => println!("delay bypassed"),
            None => println!("no delay in the chain"),
        },
        Command::DelayTime(ms) => match pipeline.delay() {
            Some(delay) => println!("delay time {:.1} ms", delay.set_time_ms(ms)),
            None => println!("no delay in the chain"),
        },
        Command::Feedback(feedback) => match pipeline.delay() {
            Some(delay) => println!("feedback {:.2}", delay.set_feedback(feedback)),
            None => println!("no delay in the chain"),
        },
        Command::Mix { wet, dry } => match pipeline.delay() {
            Some(delay) => {
                let (wet, dry) = delay.set_mix(wet, dry);
                println!("wet {:.2}, dry {:.2}", wet, dry);
            }
            None => println!("no delay in the chain"),
        },
        Command::SetParam { effect, param, value } => {
            match pipeline.set_effect_param(&effect, &param, &value) {
                Ok(()) => println!("{}.{} = {}", effect, param, value),
                Err(e) => println!("error: {}", e),
            }
        }
        Command::Reset => {
            pipeline.reset_effects();
            println!("effects reset");
        }
        Command::Help => print_help(),
        Command::Quit => return Flow::Quit,
    }
    Flow::Continue
}

pub fn print_help() {
    println!("Commands:");
    println!("  s                      status");
    println!("  d                      toggle delay");
    println!("  t <ms>                 delay time");
    println!("  f <fb>                 delay feedback");
    println!("  m <wet> <dry>          delay mix");
    println!("  p <effect> <name> <v>  set any effect parameter (effect id or type)");
    println!("  r                      reset effects");
    println!("  h                      help");
    println!("  q                      quit");
}

fn print_status(status: &PipelineStatus) {
    let p = &status.params;
    println!(
        "health: {}  uptime {:.1}s  {} Hz x {} ch, {} frames/period",
        status.health, status.uptime_secs, p.sample_rate, p.channels, p.period_frames
    );
    let s = &status.stats;
    println!(
        "capture  '{}' [{} / {}]  captured {}  dropped {}  recoveries {}",
        status.capture.device,
        status.capture.stage,
        status.capture.device_state,
        s.captured,
        s.capture_dropped,
        s.capture_recoveries
    );
    println!("process  [{}]  processed {}  dropped {}", status.process, s.processed, s.process_dropped);
    println!(
        "playback '{}' [{} / {}]  played {}  underruns {}  recoveries {}",
        status.playback.device,
        status.playback.stage,
        status.playback.device_state,
        s.played,
        s.playback_underruns,
        s.playback_recoveries
    );
    println!(
        "queues   A {}/{}  B {}/{}",
        status.queue_a.used, status.queue_a.capacity, status.queue_b.used, status.queue_b.capacity
    );
    if let Some(effects) = status.effects["effects"].as_array() {
        for effect in effects {
            println!("  {} {}", effect["id"].as_str().unwrap_or("?"), effect["params"]);
        }
    }
}

fn prompt(text: &str) {
    print!("{}", text);
    let _ = io::stdout().flush();
}

/// Send each line to `tx` until input ends, a read fails or the receiver goes away
fn forward_lines(input: impl BufRead, tx: &Sender<String>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        if tx.send(line).is_err() {
            break;
        }
    }
}

/// Forward stdin lines to a channel; the channel closes at end of input
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = channel::unbounded();
    let spawned = thread::Builder::new()
        .name("echoline-stdin".to_string())
        .spawn(move || forward_lines(io::stdin().lock(), &tx));
    if let Err(e) = spawned {
        warn!("cannot read commands from stdin: {}", e);
    }
    rx
}

enum Event {
    Line(String),
    InputClosed,
    Tick,
}

/// Read and run commands until `q` or until the pipeline stops on its own
///
/// Returns the health seen when the loop ended.
pub fn command_loop(pipeline: &Pipeline) -> PipelineHealth {
    let mut lines = spawn_stdin_reader();
    let ticker = channel::tick(TICK);
    let mut reader = CommandReader::new();

    print_help();
    prompt("> ");
    loop {
        let event = channel::select! {
            recv(lines) -> line => match line {
                Ok(line) => Event::Line(line),
                Err(_) => Event::InputClosed,
            },
            recv(ticker) -> _ => Event::Tick,
        };

        match event {
            Event::Line(line) => {
                match reader.feed(&line) {
                    Step::Command(command) => {
                        debug!("command: {:?}", command);
                        if execute(pipeline, command) == Flow::Quit {
                            info!("quit requested");
                            return pipeline.health();
                        }
                    }
                    Step::Prompt(text) => {
                        prompt(text);
                        continue;
                    }
                    Step::Invalid(message) => println!("{}", message),
                    Step::Empty => {}
                }
                prompt("> ");
            }
            Event::InputClosed => {
                info!("command input closed; running until the pipeline stops");
                lines = channel::never();
            }
            Event::Tick => {
                if !pipeline.is_running() {
                    let health = pipeline.health();
                    match &health {
                        PipelineHealth::Degraded { reason } => warn!("pipeline degraded: {}", reason),
                        other => info!("pipeline {}", other),
                    }
                    return health;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn command(line: &str) -> Command {
        match CommandReader::new().feed(line) {
            Step::Command(command) => command,
            other => panic!("expected a command from {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_forward_lines_until_input_ends() {
        let (tx, rx) = channel::unbounded();
        forward_lines(io::Cursor::new("s\nd 300\n\nq\n"), &tx);
        drop(tx);
        let lines: Vec<String> = rx.iter().collect();
        assert_eq!(lines, vec!["s", "d 300", "", "q"]);
    }

    #[test]
    fn test_forward_lines_stops_when_receiver_is_gone() {
        let (tx, rx) = channel::unbounded::<String>();
        drop(rx);
        // Returns instead of looping over the rest of the input
        forward_lines(io::Cursor::new("s\nt\nq\n"), &tx);
        assert!(tx.send("r".to_string()).is_err());
    }

    #[test]
    fn test_single_letter_commands() {
        assert_eq!(command("s"), Command::Status);
        assert_eq!(command("d"), Command::ToggleDelay);
        assert_eq!(command("r"), Command::Reset);
        assert_eq!(command("h"), Command::Help);
        assert_eq!(command("  q  "), Command::Quit);
        assert_eq!(command("QUIT"), Command::Quit);
    }

    #[test]
    fn test_commands_with_values() {
        assert_eq!(command("t 300"), Command::DelayTime(300.0));
        assert_eq!(command("f 0.5"), Command::Feedback(0.5));
        assert_eq!(command("m 0.4 0.6"), Command::Mix { wet: 0.4, dry: 0.6 });
        assert_eq!(
            command("p reverb room_type cathedral"),
            Command::SetParam {
                effect: "reverb".to_string(),
                param: "room_type".to_string(),
                value: json!("cathedral"),
            }
        );
        assert_eq!(
            command("p delay-1a2b3c4d feedback 0.7"),
            Command::SetParam {
                effect: "delay-1a2b3c4d".to_string(),
                param: "feedback".to_string(),
                value: json!(0.7),
            }
        );
    }

    #[test]
    fn test_missing_values_are_prompted() {
        let mut reader = CommandReader::new();
        assert_eq!(reader.feed("m"), Step::Prompt("wet level (0-1): "));
        assert!(reader.is_pending());
        assert_eq!(reader.feed("0.25"), Step::Prompt("dry level (0-1): "));
        assert_eq!(reader.feed("0.75"), Step::Command(Command::Mix { wet: 0.25, dry: 0.75 }));
        assert!(!reader.is_pending());

        assert_eq!(reader.feed("t"), Step::Prompt("delay time (ms): "));
        assert_eq!(reader.feed("120"), Step::Command(Command::DelayTime(120.0)));
    }

    #[test]
    fn test_bad_input() {
        let mut reader = CommandReader::new();
        assert_eq!(reader.feed(""), Step::Empty);
        assert!(matches!(reader.feed("x"), Step::Invalid(_)));
        assert_eq!(
            reader.feed("f loud"),
            Step::Invalid("'loud' is not a number".to_string())
        );
        assert!(!reader.is_pending());
    }

    #[test]
    fn test_execute_adjusts_delay() {
        use crate::config::PipelineConfig;
        use crate::dsp::EffectControls;
        use crate::engine::{MemoryCapture, MemoryPlayback};

        let pipeline = Pipeline::initialize(
            PipelineConfig::default(),
            Box::new(MemoryCapture::new("in", Vec::new())),
            Box::new(MemoryPlayback::new("out")),
        )
        .unwrap();
        assert_eq!(execute(&pipeline, Command::DelayTime(5000.0)), Flow::Continue);
        assert_eq!(pipeline.delay().map(|d| d.time_ms()), Some(2000.0));
        execute(&pipeline, Command::Mix { wet: 0.2, dry: 0.9 });
        assert_eq!(pipeline.delay().map(|d| (d.wet(), d.dry())), Some((0.2, 0.9)));
        execute(&pipeline, Command::ToggleDelay);
        assert_eq!(pipeline.delay().map(|d| d.is_enabled()), Some(false));
        assert_eq!(execute(&pipeline, Command::Quit), Flow::Quit);
    }
}
