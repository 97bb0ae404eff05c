//! Standalone audit verifier: given an export file, re-derive the ballot-set
//! checksum, the Merkle root and the tally, and compare them against the
//! published values.

use std::process::ExitCode;

use log::error;

use trusty_tally::audit::{self, AuditExport};

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: trusty-tally <audit-export.json>");
        return ExitCode::from(2);
    };

    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
            error!("failed to read {path}: {e}");
            return ExitCode::from(2);
        }
    };
    let export: AuditExport = match serde_json::from_str(&raw) {
        Ok(export) => export,
        Err(e) => {
            error!("failed to parse {path}: {e}");
            return ExitCode::from(2);
        }
    };

    let report = audit::verify_export(&export);
    println!("poll:        {}", export.snapshot.poll_id);
    println!("ballots:     {}", export.ballots.len());
    println!("checksum:    {}", if report.checksum_ok { "ok" } else { "MISMATCH" });
    println!("merkle root: {}", if report.merkle_ok { "ok" } else { "MISMATCH" });
    println!("result:      {}", if report.result_ok { "ok" } else { "MISMATCH" });

    if report.is_ok() {
        println!("verification passed");
        ExitCode::SUCCESS
    } else {
        println!("verification FAILED");
        ExitCode::FAILURE
    }
}
