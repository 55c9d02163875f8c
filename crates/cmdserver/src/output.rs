use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use cmdserver_client::{ExchangeResult, Hello};
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
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

#[derive(Serialize)]
pub struct ExchangeOutput<'a> {
    pub command: &'a [String],
    pub code: i32,
    pub output: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl<'a> ExchangeOutput<'a> {
    pub fn new(command: &'a [String], result: &ExchangeResult, with_debug: bool) -> Self {
        Self {
            command,
            code: result.code,
            output: payload_text(&result.output),
            error: payload_text(&result.error),
            debug: with_debug.then(|| payload_text(&result.debug)),
        }
    }
}

pub fn print_exchange(out: &ExchangeOutput<'_>, result: &ExchangeResult, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "CODE", "OUTPUT", "ERROR"])
                .add_row(vec![
                    out.command.join(" "),
                    out.code.to_string(),
                    out.output.trim_end().to_string(),
                    out.error.trim_end().to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("$ {} (exit {})", out.command.join(" "), out.code);
            print!("{}", out.output);
            if !out.error.is_empty() {
                for line in out.error.lines() {
                    println!("! {line}");
                }
            }
        }
        OutputFormat::Raw => {
            write_raw(&mut std::io::stdout(), &result.output);
            write_raw(&mut std::io::stderr(), &result.error);
        }
    }
}

pub fn print_hello(hello: &Hello, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(hello),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in &hello.fields {
                table.add_row(vec![key.clone(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Command server:");
            println!("  Capabilities: {}", hello.capabilities.join(", "));
            println!(
                "  Encoding:     {}",
                hello.encoding.as_deref().unwrap_or("unknown")
            );
            match hello.pid {
                Some(pid) => println!("  PID:          {pid}"),
                None => println!("  PID:          unavailable"),
            }
        }
        OutputFormat::Raw => {
            println!("{}", hello.capabilities.join(" "));
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn write_raw(out: &mut impl Write, data: &[u8]) {
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}
