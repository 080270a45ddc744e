use sandcell::{ExecutionRequest, ExitStatus};

use super::coordinator;

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn run_hello_world() {
    let coordinator = coordinator();

    let result = coordinator
        .submit(ExecutionRequest::new("print('Hello, World!')"))
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(0));
    assert!(result.is_success());
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("Hello, World!"));
    assert!(result.stderr.is_empty());
    assert!(!result.is_truncated());
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn stderr_is_captured_separately() {
    let coordinator = coordinator();

    let result = coordinator
        .submit(ExecutionRequest::new(
            "import sys\nprint('out')\nprint('err', file=sys.stderr)",
        ))
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(0));
    assert!(String::from_utf8_lossy(&result.stdout).contains("out"));
    assert!(String::from_utf8_lossy(&result.stderr).contains("err"));
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn exit_code_is_reported() {
    let coordinator = coordinator();

    let result = coordinator
        .submit(ExecutionRequest::new("import sys\nsys.exit(3)"))
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(3));
    assert!(!result.is_success());
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn interpreter_args_are_passed_through() {
    let coordinator = coordinator();

    let result = coordinator
        .submit(
            ExecutionRequest::new("import sys\nprint(sys.argv[1])").with_args(["first-arg"]),
        )
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(0));
    assert!(String::from_utf8_lossy(&result.stdout).contains("first-arg"));
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn python_exception_sets_nonzero_exit() {
    let coordinator = coordinator();

    let result = coordinator
        .submit(ExecutionRequest::new("raise RuntimeError('boom')"))
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(1));
    assert!(String::from_utf8_lossy(&result.stderr).contains("RuntimeError"));
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn output_files_come_back_as_attachments() {
    let coordinator = coordinator();

    let code = r#"
with open('output.txt', 'w') as f:
    f.write('saved result')
print('done')
"#;
    let result = coordinator
        .submit(ExecutionRequest::new(code))
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(0));
    assert_eq!(result.attachments.len(), 1);
    assert_eq!(result.attachments[0].path, "output.txt");
    assert_eq!(result.attachments[0].content, b"saved result");
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn non_output_files_are_not_collected() {
    let coordinator = coordinator();

    let code = r#"
with open('scratch.txt', 'w') as f:
    f.write('temp')
"#;
    let result = coordinator
        .submit(ExecutionRequest::new(code))
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(0));
    assert!(result.attachments.is_empty());
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn network_is_denied_by_default() {
    let coordinator = coordinator();

    let code = r#"
import socket
try:
    socket.create_connection(('1.1.1.1', 53), timeout=1)
    print('connected')
except OSError:
    print('denied')
"#;
    let result = coordinator
        .submit(ExecutionRequest::new(code))
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(0));
    assert!(String::from_utf8_lossy(&result.stdout).contains("denied"));
}

#[tokio::test]
#[ignore = "requires nsjail and namespace privileges"]
async fn host_filesystem_is_not_writable() {
    let coordinator = coordinator();

    let code = r#"
try:
    open('/etc/sandcell-test', 'w')
    print('wrote')
except OSError:
    print('readonly')
"#;
    let result = coordinator
        .submit(ExecutionRequest::new(code))
        .await
        .expect("submission rejected");

    assert_eq!(result.status, ExitStatus::Success(0));
    assert!(String::from_utf8_lossy(&result.stdout).contains("readonly"));
}
