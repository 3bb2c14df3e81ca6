// Terminal output for gantry commands
// Progress goes to stderr; step stdout stays on stdout so it can be piped

use std::time::Duration;

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const FAINT: &str = "\x1b[2m";
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD_RED: &str = "\x1b[1;31m";
const BOLD_GREEN: &str = "\x1b[1;32m";
const BOLD_BLUE: &str = "\x1b[1;34m";
const BOLD_CYAN: &str = "\x1b[1;36m";

fn paint(style: &str, text: &str) -> String {
    format!("{}{}{}", style, text, RESET)
}

/// `[instance]` tag put in front of every line a job instance produces
fn tag(instance_id: &str) -> String {
    paint(FAINT, &format!("[{}]", instance_id))
}

/// Right-aligned verb followed by a message, e.g. `   Parsing ci.yml`
pub fn status(action: &str, message: &str) {
    eprintln!("{} {}", paint(BOLD_CYAN, &format!("{:>12}", action)), message);
}

pub fn success(message: &str) {
    eprintln!("{} {}", paint(BOLD_GREEN, "  \u{2713}"), message);
}

pub fn failure(message: &str) {
    eprintln!("{} {}", paint(BOLD_RED, "  \u{2717}"), message);
}

/// A validation check that passed
pub fn check(message: &str) {
    eprintln!("{} {}", paint(GREEN, "  \u{2713}"), message);
}

pub fn warning(message: &str) {
    eprintln!("{} {}", paint(YELLOW, "  !"), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", paint(BOLD_RED, "error:"), message);
}

pub fn info(message: &str) {
    eprintln!("{} {}", paint(CYAN, "  i"), message);
}

pub fn dim(message: &str) {
    eprintln!("{}", paint(FAINT, message));
}

/// Whole line in green; used for finished jobs and steps
pub fn dim_success(message: &str) {
    eprintln!("{}", paint(GREEN, message));
}

/// Whole line in red; used for failed, cancelled and skipped work
pub fn dim_failure(message: &str) {
    eprintln!("{}", paint(RED, message));
}

pub fn job_header(instance_id: &str, total_steps: usize) {
    eprintln!(
        "{} '{}' ({} steps)",
        paint(BOLD_BLUE, "  Job"),
        instance_id,
        total_steps
    );
}

/// One line a step wrote to stdout.
///
/// Instances run concurrently, so lines interleave; the tag keeps them apart.
pub fn step_output(instance_id: &str, line: &str) {
    println!("{} | {}", tag(instance_id), line);
}

/// One line a step wrote to stderr, in red
pub fn step_error(instance_id: &str, line: &str) {
    eprintln!("{} {}", tag(instance_id), paint(RED, &format!("| {}", line)));
}

pub fn header(message: &str) {
    eprintln!("{}", paint(BOLD, &format!("==> {}", message)));
}

/// Seconds with two decimals, as shown next to finished jobs and steps
pub fn seconds(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}
