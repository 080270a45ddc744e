use std::sync::Arc;
use std::time::Duration;

use sandcell::{Config, Coordinator, ExecutionRequest, ExitStatus, SubmitError};

use super::test_config;

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn flood_of_submissions_all_complete() {
    let config = Config {
        pool_size: 2,
        queue_depth: 16,
        ..test_config()
    };
    let coordinator = Arc::new(Coordinator::new(config).expect("failed to build coordinator"));

    let mut tasks = Vec::new();
    for i in 0..10 {
        let coordinator = coordinator.clone();
        tasks.push(tokio::spawn(async move {
            coordinator
                .submit(ExecutionRequest::new(format!("print({i})")))
                .await
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        let result = task.await.unwrap().expect("submission rejected");
        assert_eq!(result.status, ExitStatus::Success(0), "submission {i}");
        let stdout = String::from_utf8_lossy(&result.stdout);
        assert!(stdout.contains(&i.to_string()));
    }

    assert_eq!(coordinator.available_slots(), 2);
    assert_eq!(coordinator.quarantined_slots(), 0);
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn overload_rejects_instead_of_queueing_forever() {
    let config = Config {
        pool_size: 1,
        queue_depth: 0,
        ..test_config()
    };
    let coordinator = Arc::new(Coordinator::new(config).expect("failed to build coordinator"));

    let running = coordinator.clone();
    let long = tokio::spawn(async move {
        running
            .submit(
                ExecutionRequest::new("import time\ntime.sleep(2)")
                    .with_timeout(Duration::from_secs(5)),
            )
            .await
    });

    // Let the first submission claim the only slot
    tokio::time::sleep(Duration::from_millis(300)).await;

    let rejected = coordinator.submit(ExecutionRequest::new("print('hi')")).await;
    assert_eq!(rejected.unwrap_err(), SubmitError::Busy);

    let result = long.await.unwrap().expect("submission rejected");
    assert_eq!(result.status, ExitStatus::Success(0));

    // The slot is free again after the long submission finished
    let result = coordinator
        .submit(ExecutionRequest::new("print('hi')"))
        .await
        .expect("submission rejected");
    assert_eq!(result.status, ExitStatus::Success(0));
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn concurrent_executions_cannot_see_each_other() {
    let config = Config {
        pool_size: 2,
        queue_depth: 2,
        ..test_config()
    };
    let coordinator = Arc::new(Coordinator::new(config).expect("failed to build coordinator"));

    // Each execution lingers long enough to overlap with the other, then
    // lists every process visible in its pid namespace.
    let code = r#"
import os, time
time.sleep(2)
pids = [p for p in os.listdir('/proc') if p.isdigit()]
print(len(pids))
"#;

    let a = {
        let c = coordinator.clone();
        let code = code.to_string();
        tokio::spawn(async move {
            c.submit(ExecutionRequest::new(code).with_timeout(Duration::from_secs(10)))
                .await
        })
    };
    let b = {
        let c = coordinator.clone();
        let code = code.to_string();
        tokio::spawn(async move {
            c.submit(ExecutionRequest::new(code).with_timeout(Duration::from_secs(10)))
                .await
        })
    };

    for task in [a, b] {
        let result = task.await.unwrap().expect("submission rejected");
        assert_eq!(result.status, ExitStatus::Success(0));
        let visible: usize = String::from_utf8_lossy(&result.stdout)
            .trim()
            .parse()
            .expect("pid count");
        // Only the jail's own small subtree is visible, never the host or
        // the concurrently running execution.
        assert!(visible <= 3, "saw {visible} processes");
    }
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn slot_state_does_not_leak_between_runs() {
    let config = Config {
        pool_size: 1,
        queue_depth: 4,
        ..test_config()
    };
    let coordinator = Coordinator::new(config).expect("failed to build coordinator");

    // First run leaves a file behind
    let result = coordinator
        .submit(ExecutionRequest::new(
            "open('output.txt', 'w').write('left over')",
        ))
        .await
        .expect("submission rejected");
    assert_eq!(result.attachments.len(), 1);

    // Second run on the same slot must see an empty home
    let result = coordinator
        .submit(ExecutionRequest::new(
            "import os\nprint(sorted(os.listdir('.')))",
        ))
        .await
        .expect("submission rejected");
    assert_eq!(result.status, ExitStatus::Success(0));
    assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "[]");
    assert!(result.attachments.is_empty());
}
