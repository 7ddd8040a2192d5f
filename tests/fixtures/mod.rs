//! Event builders, coverage reports and checker scripts shared by the integration tests

#![allow(dead_code)]

use ethers::types::Address;

use escrow_oracle::models::event::WorkSubmitted;

pub fn freelancer() -> Address {
    Address::repeat_byte(0x22)
}

/// A `WorkSubmitted` log at `(block, log_index)`.
pub fn work_submitted(job_id: u64, result_hash: &str, block: u64, log_index: u64) -> WorkSubmitted {
    WorkSubmitted {
        job_id,
        freelancer: freelancer(),
        result_hash: result_hash.to_string(),
        block_number: block,
        log_index,
    }
}

/// Minimal pytest-cov JSON report with the given total.
pub fn coverage_report(percent_covered: f64) -> String {
    format!(
        r#"{{"meta":{{"format":2,"version":"7.4.0"}},"files":{{}},"totals":{{"covered_lines":95,"num_statements":100,"percent_covered":{}}}}}"#,
        percent_covered
    )
}

/// Shell body that writes a report to the `--cov-report=json:<path>` argument and exits 0.
///
/// Run as `sh -c <script> sh --cov=. --cov-report=json:<path> <dir>`, so the
/// report flag arrives as `$2`.
pub fn writes_report_script(percent_covered: f64) -> String {
    format!(
        "path=\"${{2#--cov-report=json:}}\"; printf '%s' '{}' > \"$path\"",
        coverage_report(percent_covered)
    )
}

/// Opaque content stored under a result hash. The store writes it unchanged
/// as one file named after the hash; nothing unpacks it.
pub const ARTIFACT_BYTES: &[u8] = b"submission contents";
