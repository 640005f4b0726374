// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

use super::*;

#[yare::parameterized(
    invalid_argument = { ErrorKind::InvalidArgument, StatusCode::BAD_REQUEST },
    invalid_tool     = { ErrorKind::InvalidTool, StatusCode::BAD_REQUEST },
    not_found        = { ErrorKind::NotFound, StatusCode::NOT_FOUND },
    expired          = { ErrorKind::Expired, StatusCode::GONE },
    quota            = { ErrorKind::QuotaExhausted, StatusCode::TOO_MANY_REQUESTS },
    unavailable      = { ErrorKind::Unavailable, StatusCode::SERVICE_UNAVAILABLE },
    projection       = { ErrorKind::WorkspaceProjectionFailed, StatusCode::INTERNAL_SERVER_ERROR },
    bad_tool_output  = { ErrorKind::InvalidToolOutput, StatusCode::INTERNAL_SERVER_ERROR },
    execution        = { ErrorKind::ExecutionFailed, StatusCode::INTERNAL_SERVER_ERROR },
    internal         = { ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR },
)]
fn every_error_kind_maps_to_a_status(kind: ErrorKind, expected: StatusCode) {
    assert_eq!(status_for(kind), expected);
}

#[test]
fn tool_input_accepts_both_shapes() {
    let as_object: ExecuteToolRequest = serde_json::from_value(json!({
        "tool_source_code": "def f(x: int) -> int:\n    \"\"\"F.\"\"\"\n    return x",
        "tool_input_json": {"x": 1},
    }))
    .unwrap();
    assert_eq!(as_object.input_as_string().unwrap(), r#"{"x":1}"#);

    let as_string: ExecuteToolRequest = serde_json::from_value(json!({
        "tool_source_code": "def f(x: int) -> int:\n    \"\"\"F.\"\"\"\n    return x",
        "tool_input_json": "{\"x\": 1}",
    }))
    .unwrap();
    assert_eq!(as_string.input_as_string().unwrap(), "{\"x\": 1}");
}

#[test]
fn execute_request_body_defaults_optional_fields() {
    let req: ExecuteRequest = serde_json::from_value(json!({
        "source_code": "print(1)",
        "chat_id": "s1",
    }))
    .unwrap();
    assert!(req.files.is_empty());
    assert!(req.env.is_empty());
    assert!(!req.persistent_workspace);
    assert_eq!(req.max_downloads, None);
}
