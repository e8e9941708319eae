use localrun::daemon::ports::{BindFailure, SuggestedAddr};
use localrun::errors::{Diagnostic, ErrorList, RunStartError};
use localrun::AppError;

#[test]
fn display_prefixes_identify_the_stage() {
    assert_eq!(
        AppError::Config("bad toml".into()).to_string(),
        "config: bad toml"
    );
    assert_eq!(
        AppError::Namespace("unknown".into()).to_string(),
        "namespace: unknown"
    );
    assert_eq!(
        AppError::ForcedUpgrade("halted".into()).to_string(),
        "forced upgrade: halted"
    );
}

#[test]
fn run_start_message_displays_verbatim() {
    let err: AppError = RunStartError::Message("compile failed".into()).into();
    assert_eq!(err.to_string(), "compile failed");
}

#[test]
fn run_start_list_displays_one_line_per_diagnostic() {
    let list = ErrorList {
        errors: vec![
            Diagnostic {
                message: "undefined: Foo".into(),
                file: Some("svc/api.go".into()),
                line: Some(12),
            },
            Diagnostic {
                message: "missing import".into(),
                file: Some("svc/db.go".into()),
                line: None,
            },
            Diagnostic {
                message: "build failed".into(),
                file: None,
                line: None,
            },
        ],
    };
    let err = AppError::RunStart(RunStartError::List(list));

    assert_eq!(
        err.to_string(),
        "svc/api.go:12: undefined: Foo\nsvc/db.go: missing import\nbuild failed"
    );
}

#[test]
fn error_list_round_trips_as_json() {
    let json = r#"{"errors":[{"message":"boom","file":"a.rs","line":3}]}"#;
    let list: ErrorList = serde_json::from_str(json).unwrap();

    assert!(!list.is_empty());
    assert_eq!(list.errors[0].line, Some(3));
    assert_eq!(serde_json::to_string(&list).unwrap(), json);
}

#[test]
fn bind_failure_converts_to_port_bind() {
    let failure = BindFailure {
        addr: ":4000".into(),
        in_use: true,
        reason: "address in use".into(),
        suggestion: Some(SuggestedAddr {
            host: "localhost".into(),
            port: 4001,
        }),
    };
    let err: AppError = failure.into();

    assert!(matches!(err, AppError::PortBind(_)));
    assert_eq!(err.to_string(), "bind: failed to bind :4000: address in use");
}

#[test]
fn sqlx_errors_map_to_db() {
    let err: AppError = sqlx::Error::RowNotFound.into();
    assert!(matches!(err, AppError::Db(_)));
}
