use std::time::Duration;

use sandcell::{ExecutionRequest, ExitStatus, ResourceLimits};

use super::coordinator;

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn infinite_loop_times_out() {
    let coordinator = coordinator();

    let result = coordinator
        .submit(
            ExecutionRequest::new("while True: pass").with_timeout(Duration::from_secs(2)),
        )
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::TimedOut);
    assert!(result.status.is_terminated());
    // The watchdog cut the jail off near the limit, not at the fallback
    // deadline
    assert!(result.wall_time < Duration::from_secs(5));
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn sleep_past_wall_limit_times_out() {
    let coordinator = coordinator();

    let result = coordinator
        .submit(
            ExecutionRequest::new("import time\ntime.sleep(30)")
                .with_timeout(Duration::from_secs(2)),
        )
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::TimedOut);
}

#[tokio::test]
#[ignore = "requires nsjail, namespace privileges, and cgroup v2"]
async fn memory_bomb_exceeds_limit() {
    let coordinator = coordinator();

    let code = r#"
data = []
while True:
    data.append(' ' * (1024 * 1024))
"#;
    let result = coordinator
        .submit(
            ExecutionRequest::new(code)
                .with_memory_limit(64 * ResourceLimits::MB)
                .with_timeout(Duration::from_secs(10)),
        )
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::MemoryExceeded);
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn output_flood_is_truncated_at_the_cap() {
    let coordinator = coordinator();

    let cap = 64 * 1024;
    let result = coordinator
        .submit(
            ExecutionRequest::new("print('x' * (1024 * 1024))").with_output_limit(cap),
        )
        .await
        .expect("submission rejected");

    assert!(result.stdout_truncated);
    assert_eq!(result.stdout.len() as u64, cap);
    // Truncation is not an error; the run is reported as killed, not failed
    assert_eq!(result.status, ExitStatus::Killed);
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn output_under_the_cap_is_untouched() {
    let coordinator = coordinator();

    let result = coordinator
        .submit(ExecutionRequest::new("print('y' * 100)").with_output_limit(64 * 1024))
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(0));
    assert!(!result.stdout_truncated);
    assert_eq!(result.stdout.len(), 101); // 100 bytes plus newline
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn fork_bomb_is_contained() {
    let coordinator = coordinator();

    let code = r#"
import os
try:
    while True:
        os.fork()
except OSError:
    print('forks exhausted')
"#;
    let result = coordinator
        .submit(ExecutionRequest::new(code).with_timeout(Duration::from_secs(5)))
        .await
        .expect("submission rejected");

    // Either the process limit stops the bomb or the wall clock does;
    // both are acceptable as long as the submission terminates.
    assert!(
        result.status == ExitStatus::Success(0)
            || result.status.is_terminated(),
        "unexpected status {:?}",
        result.status
    );
}
