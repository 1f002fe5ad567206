use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use nu_ansi_term::{Color, Style};
use sombra_check::check::{ProgressListener, RecordType};
use std::fmt::Display;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Theme {
    Auto,
    Light,
    Dark,
    Plain,
}

#[derive(Clone, Copy)]
enum Tone {
    Info,
    Success,
    Warn,
}

impl Tone {
    fn icon(self) -> &'static str {
        match self {
            Tone::Info => "ℹ",
            Tone::Success => "✔",
            Tone::Warn => "⚠",
        }
    }
}

/// Terminal output for the CLI.
///
/// Quiet mode drops decoration and sends status lines to stderr so stdout
/// stays machine-readable.
pub struct Ui {
    palette: Palette,
    paint: bool,
    quiet: bool,
}

impl Ui {
    pub fn new(theme: Theme, quiet: bool) -> Self {
        let paint = theme != Theme::Plain && !quiet && std::io::stdout().is_terminal();

        #[cfg(windows)]
        if paint {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        Self {
            palette: Palette::for_theme(theme),
            paint,
            quiet,
        }
    }

    fn style(&self, style: Style) -> Style {
        if self.paint {
            style
        } else {
            Style::new()
        }
    }

    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(&str, String)> = rows
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();
        if rows.is_empty() {
            return;
        }
        self.heading(title);
        let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let key = self.style(self.palette.key);
        for (name, value) in rows {
            println!("  {} {value}", key.paint(format!("{name:>width$}:")));
        }
    }

    pub fn list<I>(&self, title: &str, entries: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut entries = entries.into_iter().peekable();
        if entries.peek().is_none() {
            return;
        }
        self.heading(title);
        let bullet = if self.paint { "•" } else { "-" };
        for entry in entries {
            println!("  {} {entry}", self.style(self.palette.accent).paint(bullet));
        }
    }

    /// One finding line, tagged with its record type.
    pub fn finding(&self, record_type: RecordType, id: u64, message: &str) -> String {
        let tag = self
            .style(self.palette.warn)
            .paint(format!("{:<18}", record_type.as_str()));
        format!("{tag} {id:>8}  {message}")
    }

    pub fn info(&self, message: &str) {
        self.status(Tone::Info, message);
    }

    pub fn success(&self, message: &str) {
        self.status(Tone::Success, message);
    }

    pub fn warn(&self, message: &str) {
        self.status(Tone::Warn, message);
    }

    fn status(&self, tone: Tone, message: &str) {
        if self.quiet {
            eprintln!("{message}");
            return;
        }
        let style = match tone {
            Tone::Info => self.palette.accent,
            Tone::Success => self.palette.success,
            Tone::Warn => self.palette.warn,
        };
        let line = format!("{} {message}", self.style(style).paint(tone.icon()));
        match tone {
            Tone::Warn => eprintln!("{line}"),
            Tone::Info | Tone::Success => println!("{line}"),
        }
    }

    /// Spinner shown while `label` runs; cleared by [`Spinner::finish`].
    pub fn spinner(&self, label: impl Into<String>) -> Spinner {
        let label = label.into();
        let bar = (!self.quiet).then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner())
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            );
            bar.set_message(label.clone());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Spinner {
            label,
            started: Instant::now(),
            bar,
        }
    }

    /// Progress bar fed by a running check. Hidden when quiet or when stderr
    /// is not a terminal.
    pub fn check_progress(&self, label: &str) -> Arc<CheckProgress> {
        let target = if self.quiet || !std::io::stderr().is_terminal() {
            ProgressDrawTarget::hidden()
        } else {
            ProgressDrawTarget::stderr()
        };
        let bar = ProgressBar::with_draw_target(None, target);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len} ranges {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(label.to_string());
        Arc::new(CheckProgress { bar })
    }

    fn heading(&self, title: &str) {
        if self.quiet {
            println!("{title}");
        } else {
            println!("{}", self.style(self.palette.heading).paint(format!("▸ {title}")));
        }
    }
}

pub struct Spinner {
    label: String,
    started: Instant,
    bar: Option<ProgressBar>,
}

impl Spinner {
    pub fn finish(mut self) -> Duration {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.started.elapsed()
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            let elapsed = format_duration(self.started.elapsed());
            bar.abandon_with_message(format!("{} failed after {elapsed}", self.label));
        }
    }
}

/// Renders check progress with `indicatif`.
pub struct CheckProgress {
    bar: ProgressBar,
}

impl ProgressListener for CheckProgress {
    fn started(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
    }

    fn advance(&self, units: u64) {
        self.bar.inc(units);
    }

    fn finished(&self) {
        self.bar.finish_and_clear();
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{secs:.2}s")
    } else {
        format!("{:.0}ms", secs * 1_000.0)
    }
}

#[derive(Clone, Copy)]
struct Palette {
    heading: Style,
    key: Style,
    accent: Style,
    success: Style,
    warn: Style,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light => Self {
                heading: Style::new().fg(Color::Blue).bold(),
                key: Style::new().fg(Color::Black).bold(),
                accent: Style::new().fg(Color::Purple),
                success: Style::new().fg(Color::Green).bold(),
                warn: Style::new().fg(Color::Red).bold(),
            },
            Theme::Dark | Theme::Auto => Self {
                heading: Style::new().fg(Color::Purple).bold(),
                key: Style::new().fg(Color::LightBlue).bold(),
                accent: Style::new().fg(Color::LightCyan),
                success: Style::new().fg(Color::LightGreen).bold(),
                warn: Style::new().fg(Color::Yellow).bold(),
            },
            Theme::Plain => Self {
                heading: Style::new(),
                key: Style::new(),
                accent: Style::new(),
                success: Style::new(),
                warn: Style::new(),
            },
        }
    }
}
