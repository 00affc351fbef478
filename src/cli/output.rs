//! Output formatting for CLI commands

use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Output helper for consistent formatting
///
/// Results go to stdout. Progress is logged to stderr through `tracing`, so
/// JSON output stays parseable while a deploy is running.
pub struct Output {
    format: OutputFormat,
    verbose: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    /// Prints a success message, with extra fields in JSON mode
    pub fn success(&self, message: &str, details: serde_json::Value) {
        match self.format {
            OutputFormat::Text => println!("{}", message),
            OutputFormat::Json => {
                let mut document = serde_json::json!({
                    "success": true,
                    "message": message
                });
                if let (Some(document), serde_json::Value::Object(details)) =
                    (document.as_object_mut(), details)
                {
                    document.extend(details);
                }
                println!("{}", document);
            }
        }
    }

    /// Prints structured data
    pub fn data<T: Serialize>(&self, data: &T) {
        let rendered = match self.format {
            OutputFormat::Text => serde_json::to_string_pretty(data),
            OutputFormat::Json => serde_json::to_string(data),
        };
        if let Ok(json) = rendered {
            println!("{}", json);
        }
    }

    /// Prints a table row (text only, ignored in JSON mode)
    pub fn row(&self, columns: &[&str]) {
        if self.format == OutputFormat::Text {
            println!("{}", columns.join("\t"));
        }
    }

    /// Returns true if using JSON format
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Prints a verbose debug message with context (only when --verbose is set)
    pub fn verbose_ctx(&self, context: &str, message: &str) {
        if self.verbose {
            eprintln!("[verbose:{}] {}", context, message);
        }
    }
}
