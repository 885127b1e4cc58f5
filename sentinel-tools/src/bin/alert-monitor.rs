// alert-monitor
//
// Live terminal view of the fraud engine's alert feed.
//
// Quit:  q / Esc / Ctrl-C

use clap::Parser;
use crossbeam::channel;
use crossterm::style::{Attribute, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{cursor, event, style, terminal, ExecutableCommand, QueueableCommand};
use sentinel::Dashboard;
use sentinel_tools::logging::{self, LogTarget};
use sentinel_tools::render::{self, Line, LoggedEvent, RenderOptions};
use sentinel_tools::EngineOpts;

use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "alert-monitor",
    version,
    about = "Live dashboard of fraud alerts raised by the detection engine"
)]
struct Cli {
    #[command(flatten)]
    engine: EngineOpts,

    /// UI refresh rate, at most 100
    #[arg(long, default_value_t = 10)]
    fps: u64,

    /// Suppress footer hint
    #[arg(long)]
    quiet: bool,

    /// Max connection events to show
    #[arg(long = "event-log-size", default_value_t = 5)]
    event_log_size: usize,

    /// Write logs to this file (logging is off otherwise)
    #[arg(long = "log-file")]
    log_file: Option<PathBuf>,
}

struct Tui {
    stdout: io::Stdout,
}

impl Tui {
    fn setup() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        stdout.execute(terminal::EnterAlternateScreen)?;
        stdout.execute(cursor::Hide)?;
        Ok(Self { stdout })
    }

    fn teardown(&mut self) {
        let _ = self.stdout.execute(cursor::Show);
        let _ = self.stdout.execute(terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
        let _ = self.stdout.flush();
    }

    fn draw(&mut self, lines: &[Line], height: usize) -> io::Result<()> {
        self.stdout.queue(cursor::MoveTo(0, 0))?;
        self.stdout
            .queue(terminal::Clear(terminal::ClearType::All))?;

        for line in lines.iter().take(height) {
            for span in &line.spans {
                if span.bold {
                    self.stdout.queue(SetAttribute(Attribute::Bold))?;
                }
                if let Some(color) = span.color {
                    self.stdout.queue(SetForegroundColor(color))?;
                }
                self.stdout.queue(style::Print(&span.text))?;
                self.stdout.queue(ResetColor)?;
                self.stdout.queue(SetAttribute(Attribute::Reset))?;
            }
            self.stdout.queue(cursor::MoveToNextLine(1))?;
        }

        self.stdout.flush()
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.engine.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("alert-monitor: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let log_file = cli.log_file.clone().or_else(|| config.logging.file.clone());
    if let Err(e) = logging::init_logging(&config.logging.level, LogTarget::for_screen(log_file)) {
        eprintln!("alert-monitor: {}", e);
        return ExitCode::FAILURE;
    }

    let options = config.dashboard_options();
    let render_options = RenderOptions {
        feed_rows: 2 * options.capacity,
        quiet: cli.quiet,
    };
    let mut dashboard = match Dashboard::open(&config.engine.url, options) {
        Ok(dashboard) => dashboard,
        Err(e) => {
            eprintln!("alert-monitor: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut tui = match Tui::setup() {
        Ok(tui) => tui,
        Err(e) => {
            eprintln!("alert-monitor: terminal setup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let mut t = Tui {
            stdout: io::stdout(),
        };
        t.teardown();
        original_hook(panic_info);
    }));

    // Keyboard handler
    let (key_tx, key_rx) = channel::unbounded();
    std::thread::spawn(move || loop {
        match event::read() {
            Ok(ev) => {
                if key_tx.send(ev).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    });

    let mut event_log: VecDeque<LoggedEvent> = VecDeque::new();
    let frame = render::frame_period(cli.fps);

    // UI loop
    let tick = channel::tick(frame);
    let mut status = ExitCode::SUCCESS;
    'main: loop {
        crossbeam::select! {
            recv(key_rx) -> ev => {
                if let Ok(event::Event::Key(k)) = ev {
                    use event::{KeyCode, KeyModifiers};
                    let quit = k.code == KeyCode::Char('q')
                             || k.code == KeyCode::Esc
                             || (k.code == KeyCode::Char('c') && k.modifiers == KeyModifiers::CONTROL);
                    if quit { break 'main; }
                }
            }

            recv(tick) -> _ => {
                dashboard.poll_with(Duration::ZERO, |ev| {
                    render::log_event(&mut event_log, cli.event_log_size, ev)
                });

                let (width, height) = terminal::size().unwrap_or((80, 24));
                let mut lines = render::dashboard_lines(
                    &dashboard.view(),
                    width as usize,
                    &render_options,
                );
                let events = render::event_log_lines(&event_log, width as usize);
                if !events.is_empty() {
                    lines.push(Line::blank());
                    lines.extend(events);
                }

                if let Err(e) = tui.draw(&lines, height as usize) {
                    tracing::error!("redraw failed: {}", e);
                    status = ExitCode::FAILURE;
                    break 'main;
                }
            }
        }
    }

    dashboard.close();
    tui.teardown();
    status
}
