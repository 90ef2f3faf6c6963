// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `waypoint classify` command - Dry-run the trigger policy.
//!
//! Each argument is an operation name, optionally with its return value
//! (`accept=5`). Calls are numbered in argument order.

use serde::Serialize;
use waypoint_core::{Classification, RecvPolicy, SocketCall, SocketOp, TriggerPolicy};

#[derive(Serialize)]
struct Row {
    seq: u64,
    op: SocketOp,
    result: Option<i64>,
    classification: Classification,
}

fn parse_call(seq: u64, arg: &str) -> Result<SocketCall, String> {
    let (name, result) = match arg.split_once('=') {
        Some((name, value)) => {
            let result = value
                .parse::<i64>()
                .map_err(|e| format!("Invalid result in {:?}: {}", arg, e))?;
            (name, Some(result))
        }
        None => (arg, None),
    };

    let op = name.parse::<SocketOp>()?;
    let call = SocketCall::new(seq, op, -1);
    Ok(match result {
        Some(r) => call.with_result(r),
        None => call,
    })
}

pub fn execute(
    recv_policy: RecvPolicy,
    ops: &[String],
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut policy = TriggerPolicy::new(recv_policy);
    let mut rows = Vec::with_capacity(ops.len());

    for (seq, arg) in ops.iter().enumerate() {
        let call = parse_call(seq as u64, arg)?;
        rows.push(Row {
            seq: call.seq,
            op: call.op,
            result: call.result,
            classification: policy.classify(&call),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for row in &rows {
        let class = match row.classification {
            Classification::Irrelevant => "-".to_string(),
            Classification::Boundary => "BOUNDARY".to_string(),
            Classification::Descriptor(fd) => format!("descriptor {}", fd),
        };
        println!("{:>4}  {:<11} {}", row.seq, row.op.name(), class);
    }
    println!();
    println!(
        "{} boundary(ies), {} send(s), policy {}",
        policy.boundary_count(),
        policy.sends(),
        policy.recv_policy()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call() {
        let call = parse_call(2, "accept=7").unwrap();
        assert_eq!(call.op, SocketOp::Accept);
        assert_eq!(call.result, Some(7));
        assert_eq!(call.seq, 2);

        assert_eq!(parse_call(0, "recv").unwrap().result, None);
        assert!(parse_call(0, "accept=x").is_err());
        assert!(parse_call(0, "poll").is_err());
    }
}
