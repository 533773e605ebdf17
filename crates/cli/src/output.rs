//! CLI output formatting utilities.
//!
//! Rules and other machine-readable results go to stdout undecorated.
//! Status messages and errors go to stderr, colored when supported.

use owo_colors::{OwoColorize, Stream};

use planex_lib::index::PackageFailure;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

/// Report every input that could not be loaded, one per line.
pub fn print_failures(failures: &[PackageFailure]) {
  for failure in failures {
    print_error(&failure.to_string());
  }
}
