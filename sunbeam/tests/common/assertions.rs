use std::process::Output;

pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "Expected to find '{needle}' in output, got: {haystack}"
    );
}

/// The command failed and reported `code` on stderr.
pub fn assert_failed_with(output: &Output, code: &str) {
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        !output.status.success(),
        "Expected failure, got success; stderr: {stderr}"
    );
    assert_contains(&stderr, &format!("[{code}]"));
}
