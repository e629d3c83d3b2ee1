// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn parses_workspace_and_base() {
    let (ws, base, mp) = parse(&strings(&["/tmp/.stagekit", "mpiexec_solver"])).unwrap();
    assert_eq!(ws, "/tmp/.stagekit");
    assert_eq!(base, "mpiexec_solver");
    assert_eq!(mp, None);
}

#[test]
fn parses_mp_flag() {
    let (_, _, mp) =
        parse(&strings(&["/tmp/.stagekit", "mpiexec_worker", "-mp", "4"])).unwrap();
    assert_eq!(mp, Some(4));
}

#[yare::parameterized(
    missing_base  = { &["/tmp/.stagekit"] },
    zero_procs    = { &["/tmp/.stagekit", "base", "-mp", "0"] },
    bad_count     = { &["/tmp/.stagekit", "base", "-mp", "many"] },
    unknown_flag  = { &["/tmp/.stagekit", "base", "--verbose"] },
)]
fn malformed_invocations_are_rejected(args: &[&str]) {
    assert!(parse(&strings(args)).is_err());
}
