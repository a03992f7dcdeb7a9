use std::io::{IsTerminal, Write};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use image::DynamicImage;
use proctorcast_peer::{ClientEvent, ClientState, ClientStatus};
use proctorcast_roster::Student;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// Terminal stand-in for a rendered screen: size plus average colour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub width: u32,
    pub height: u32,
    pub average: [u8; 3],
}

impl Preview {
    pub fn render(image: &DynamicImage) -> Self {
        let thumb = image.thumbnail(16, 16).to_rgb8();
        let pixels = (u64::from(thumb.width()) * u64::from(thumb.height())).max(1);

        let mut sum = [0u64; 3];
        for pixel in thumb.pixels() {
            for (acc, channel) in sum.iter_mut().zip(pixel.0) {
                *acc += u64::from(channel);
            }
        }

        Self {
            width: image.width(),
            height: image.height(),
            average: sum.map(|total| (total / pixels) as u8),
        }
    }

    pub fn color_hex(&self) -> String {
        let [r, g, b] = self.average;
        format!("#{r:02x}{g:02x}{b:02x}")
    }
}

pub type RosterEntry = (Arc<Student>, Option<Arc<Preview>>);

#[derive(Serialize)]
struct StudentOutput<'a> {
    id: &'a str,
    name: &'a str,
    image_version: u64,
    width: Option<u32>,
    height: Option<u32>,
    average_color: Option<String>,
    joined_at: u64,
    updated_at: u64,
}

#[derive(Serialize)]
struct RosterOutput<'a> {
    count: usize,
    timestamp: u64,
    students: Vec<StudentOutput<'a>>,
}

pub fn print_roster(entries: &[RosterEntry], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = RosterOutput {
                count: entries.len(),
                timestamp: unix_seconds(SystemTime::now()),
                students: entries
                    .iter()
                    .map(|(student, preview)| StudentOutput {
                        id: student.id(),
                        name: student.name(),
                        image_version: student.image_version(),
                        width: preview.as_ref().map(|p| p.width),
                        height: preview.as_ref().map(|p| p.height),
                        average_color: preview.as_ref().map(|p| p.color_hex()),
                        joined_at: unix_seconds(student.joined_at()),
                        updated_at: unix_seconds(student.updated_at()),
                    })
                    .collect(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ID", "NAME", "IMAGE", "VERSION", "UPDATED"]);
            for (student, preview) in entries {
                table.add_row(vec![
                    student.id().to_string(),
                    student.name().to_string(),
                    preview_label(preview.as_deref()),
                    student.image_version().to_string(),
                    age_label(student.updated_at()),
                ]);
            }
            println!("{table}");
            println!("{} connected", entries.len());
        }
        OutputFormat::Pretty => {
            println!("roster: {} connected", entries.len());
            for (student, preview) in entries {
                println!(
                    "  {} ({}) image={} v{} updated {}",
                    student.id(),
                    student.name(),
                    preview_label(preview.as_deref()),
                    student.image_version(),
                    age_label(student.updated_at())
                );
            }
        }
        OutputFormat::Raw => {
            let mut out = std::io::stdout().lock();
            for (student, _) in entries {
                let _ = writeln!(out, "{}\t{}", student.id(), student.name());
            }
            let _ = out.flush();
        }
    }
}

/// Print a flat record: one JSON object, a two-column table, `key=value`
/// pairs, or tab-separated values.
pub fn print_record<T: Serialize>(record: &T, fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in fields {
                table.add_row(vec![key.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line = fields
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(" ");
            println!("{line}");
        }
        OutputFormat::Raw => {
            let line = fields
                .iter()
                .map(|(_, value)| value.as_str())
                .collect::<Vec<_>>()
                .join("\t");
            println!("{line}");
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    event: &'static str,
    state: Option<ClientState>,
    error: Option<&'a str>,
    timestamp: u64,
}

pub fn print_client_event(event: &ClientEvent, format: OutputFormat) {
    let (out, fields) = match event {
        ClientEvent::StateChanged(state) => (
            EventOutput {
                event: "state",
                state: Some(*state),
                error: None,
                timestamp: unix_seconds(SystemTime::now()),
            },
            vec![("event", "state".to_string()), ("state", state_label(*state))],
        ),
        ClientEvent::Error(message) => (
            EventOutput {
                event: "error",
                state: None,
                error: Some(message.as_str()),
                timestamp: unix_seconds(SystemTime::now()),
            },
            vec![("event", "error".to_string()), ("error", message.clone())],
        ),
    };
    // Events are line-oriented.
    let format = match format {
        OutputFormat::Table => OutputFormat::Pretty,
        other => other,
    };
    print_record(&out, &fields, format);
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    state: ClientState,
    server: Option<String>,
    frames_sent: u64,
    last_sent: Option<u64>,
    last_error: Option<&'a str>,
}

pub fn print_client_status(status: &ClientStatus, format: OutputFormat) {
    let out = StatusOutput {
        state: status.state,
        server: status.server.map(|ip| ip.to_string()),
        frames_sent: status.frames_sent,
        last_sent: status.last_sent.map(unix_seconds),
        last_error: status.last_error.as_deref(),
    };
    let fields = vec![
        ("state", state_label(status.state)),
        ("server", out.server.clone().unwrap_or_else(|| "-".to_string())),
        ("frames_sent", status.frames_sent.to_string()),
        (
            "last_sent",
            status.last_sent.map(age_label).unwrap_or_else(|| "never".to_string()),
        ),
        ("last_error", out.last_error.unwrap_or("-").to_string()),
    ];
    print_record(&out, &fields, format);
}

fn state_label(state: ClientState) -> String {
    match state {
        ClientState::Idle => "idle",
        ClientState::Discovering => "discovering",
        ClientState::Connecting => "connecting",
        ClientState::Streaming => "streaming",
        ClientState::Disconnected => "disconnected",
    }
    .to_string()
}

pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn preview_label(preview: Option<&Preview>) -> String {
    match preview {
        Some(preview) => format!("{}x{} {}", preview.width, preview.height, preview.color_hex()),
        None => "-".to_string(),
    }
}

fn age_label(time: SystemTime) -> String {
    match SystemTime::now().duration_since(time) {
        Ok(age) => format!("{}s ago", age.as_secs()),
        Err(_) => "just now".to_string(),
    }
}
