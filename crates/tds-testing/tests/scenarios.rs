//! End-to-end client behaviour against the mock server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use tds_client::{
    Arity, BulkInsert, CancellationToken, Command, Database, Error, Numeric, Param, PoolConfig,
    Sink, Slot, SqlType, Value,
};
use tds_testing::{MockResponse, MockTdsServer, column};
use tds_wire::PacketType;
use tds_wire::utf16::encode_utf16;

async fn open(server: &MockTdsServer) -> Database {
    open_with(server.client_config()).await
}

async fn open_with(config: tds_client::Config) -> Database {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Database::open(config.pool(PoolConfig::new().init_capacity(1).max_capacity(2)))
        .await
        .expect("database opens against mock server")
}

fn param_value(request: &tds_testing::Request, name: &str) -> Value {
    request
        .param(name)
        .map(|p| p.value.clone())
        .unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_single_row_into_bound_slot() {
    let server = MockTdsServer::builder()
        .with_response(
            "select bar = @foo",
            MockResponse::custom(|req| {
                MockResponse::rows(
                    vec![column("bar", SqlType::Int)],
                    vec![vec![param_value(req, "foo")]],
                )
            }),
        )
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let mut rows = db
        .query(Command::new("select bar = @foo").param("foo", 1i32).arity(Arity::One))
        .await
        .unwrap();
    let bar: Slot<i32> = Slot::default();
    rows.prep("bar", &bar).unwrap();

    assert!(rows.next().await.unwrap());
    assert_eq!(bar.get(), 1);
    assert!(!rows.next().await.unwrap());
    rows.close().await.unwrap();

    let requests = server.requests().await;
    let rpc = requests.last().unwrap();
    assert_eq!(rpc.packet_type, PacketType::Rpc);
    assert_eq!(rpc.sql, "select bar = @foo");
}

#[tokio::test]
async fn test_typed_params_echo_exactly() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let db = open(&server).await;

    let amount = Numeric::new(1234, 2).unwrap();
    let mut rows = db
        .query(
            Command::new("select @bt, @bf, @i8, @i16, @i64, @bb, @dec")
                .param("bt", true)
                .param("bf", false)
                .param("i8", 250u8)
                .param("i16", -3_000i16)
                .param("i64", i64::MAX)
                .param("bb", vec![0xDE, 0xAD, 0xBE, 0xEF])
                .bind(Param::new("dec", amount).with_type(SqlType::Decimal {
                    precision: 38,
                    scale: 4,
                }))
                .arity(Arity::OneMust),
        )
        .await
        .unwrap();

    let (mut bt, mut bf, mut i8v, mut i16v, mut i64v) = (false, true, 0u8, 0i16, 0i64);
    let mut bb: Vec<u8> = Vec::new();
    let mut dec = Numeric::default();
    assert!(
        rows.scan(&mut [&mut bt, &mut bf, &mut i8v, &mut i16v, &mut i64v, &mut bb, &mut dec])
            .await
            .unwrap()
    );
    rows.close().await.unwrap();

    assert!(bt);
    assert!(!bf);
    assert_eq!(i8v, 250);
    assert_eq!(i16v, -3_000);
    assert_eq!(i64v, i64::MAX);
    assert_eq!(bb, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(dec.to_string(), "12.3400");
    assert_eq!(dec, amount);
}

#[tokio::test]
async fn test_decimal_rounds_to_declared_scale() {
    let server = MockTdsServer::builder()
        .with_response(
            "select v = cast(@v as decimal(36, 2))",
            MockResponse::custom(|req| {
                let value = match param_value(req, "v") {
                    Value::Numeric(n) => Value::Numeric(n.rescale(2).unwrap()),
                    other => other,
                };
                MockResponse::rows(
                    vec![column(
                        "v",
                        SqlType::Decimal {
                            precision: 36,
                            scale: 2,
                        },
                    )],
                    vec![vec![value]],
                )
            }),
        )
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let raw = Numeric::new(35_840_000_000_000_003, 15).unwrap();
    let mut rows = db
        .query(
            Command::new("select v = cast(@v as decimal(36, 2))")
                .bind(Param::new("v", raw).with_type(SqlType::Decimal {
                    precision: 38,
                    scale: 2,
                }))
                .arity(Arity::OneMust),
        )
        .await
        .unwrap();
    let mut text = String::new();
    assert!(rows.scan(&mut [&mut text]).await.unwrap());
    rows.close().await.unwrap();
    assert_eq!(text, "35.84");
}

#[tokio::test]
async fn test_scan_after_prep_sees_bound_columns() {
    let server = MockTdsServer::builder()
        .with_response(
            "select id, name from people",
            MockResponse::rows(
                vec![
                    column("id", SqlType::Int),
                    column("name", SqlType::NVarChar(Some(32))),
                ],
                vec![
                    vec![Value::I32(1), Value::from("ada")],
                    vec![Value::I32(2), Value::from("grace")],
                ],
            ),
        )
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let mut rows = db.query("select id, name from people").await.unwrap();
    let bound: Slot<i32> = Slot::default();
    rows.prepx(0, &bound).unwrap();

    let mut id: Option<i32> = None;
    let mut name = String::new();
    assert!(rows.scan(&mut [&mut id, &mut name]).await.unwrap());
    assert_eq!((bound.get(), id, name.as_str()), (1, Some(1), "ada"));
    assert!(rows.scan(&mut [&mut id, &mut name]).await.unwrap());
    assert_eq!((bound.get(), id, name.as_str()), (2, Some(2), "grace"));
    assert!(!rows.scan(&mut [&mut id, &mut name]).await.unwrap());
    rows.close().await.unwrap();

    let mut rows = db.query("select id, name from people").await.unwrap();
    let sink = Sink::new(Vec::<u8>::new());
    rows.prep_sink("name", &sink).unwrap();
    let err = rows.scan(&mut [&mut id, &mut name]).await.unwrap_err();
    assert!(matches!(err, Error::ColumnStreamed(ref c) if c == "name"), "{err:?}");
    assert!(rows.next().await.unwrap());
    assert_eq!(sink.with(|w| w.clone()), b"ada".to_vec());
    rows.close().await.unwrap();
}

#[tokio::test]
async fn test_streamed_parameter_round_trip() {
    let server = MockTdsServer::builder()
        .with_response(
            "select v = @v, l = len(@v)",
            MockResponse::custom(|req| {
                let value = param_value(req, "v");
                let len = match &value {
                    Value::String(s) => i64::try_from(s.chars().count()).unwrap_or(-1),
                    _ => -1,
                };
                MockResponse::rows(
                    vec![
                        column("v", SqlType::NVarChar(None)),
                        column("l", SqlType::BigInt),
                    ],
                    vec![vec![value, Value::I64(len)]],
                )
            }),
        )
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    // several packets' worth, with a four-byte character on every line
    let text = "line 😀 of a streamed document\n".repeat(2_000);
    let reader = std::io::Cursor::new(text.clone().into_bytes());
    let mut rows = db
        .query(
            Command::new("select v = @v, l = len(@v)")
                .stream("v", reader)
                .arity(Arity::OneMust),
        )
        .await
        .unwrap();
    let mut back = String::new();
    let mut len = 0i64;
    assert!(rows.scan(&mut [&mut back, &mut len]).await.unwrap());
    rows.close().await.unwrap();

    assert_eq!(back, text);
    assert_eq!(len, i64::try_from(text.chars().count()).unwrap());
}

#[tokio::test]
async fn test_failed_stream_withdraws_request_and_keeps_session() {
    struct Broken;

    impl tokio::io::AsyncRead for Broken {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::other("source went away")))
        }
    }

    let server = MockTdsServer::builder()
        .with_response("load_blob", MockResponse::Done)
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let source = tokio::io::AsyncReadExt::chain(std::io::Cursor::new(vec![1u8; 10_000]), Broken);
    let err = db
        .exec(
            Command::procedure("load_blob")
                .bind(Param::stream("blob", source).with_type(SqlType::VarBinary(None))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StreamAborted { ref param, .. } if param == "@blob"), "{err:?}");
    assert!(!err.is_fatal());

    assert!(
        server.requests().await.iter().all(|r| r.sql != "load_blob"),
        "withdrawn request must not reach the server"
    );
    db.ping().await.unwrap();
    assert_eq!(db.status().in_use, 0);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_max_string_streams_intact() {
    let server = MockTdsServer::builder()
        .with_response(
            "select v = @v, l = len(@v)",
            MockResponse::custom(|req| {
                let value = param_value(req, "v");
                let len = match &value {
                    Value::String(s) => i64::try_from(s.chars().count()).unwrap_or(-1),
                    _ => -1,
                };
                MockResponse::rows(
                    vec![
                        column("v", SqlType::NVarChar(None)),
                        column("l", SqlType::BigInt),
                    ],
                    vec![vec![value, Value::I64(len)]],
                )
            }),
        )
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let text = "abcdefghij".repeat(10_000);
    let mut rows = db
        .query(
            Command::new("select v = @v, l = len(@v)")
                .bind(Param::new("v", text.as_str()).with_type(SqlType::NVarChar(None)))
                .arity(Arity::OneMust),
        )
        .await
        .unwrap();
    let mut back = String::new();
    let mut len = 0i64;
    assert!(rows.scan(&mut [&mut back, &mut len]).await.unwrap());
    rows.close().await.unwrap();

    assert_eq!(len, 100_000);
    assert_eq!(back.len(), 100_000);
    assert_eq!(back, text);
}

#[tokio::test]
async fn test_astral_character_round_trip() {
    assert_eq!(&encode_utf16("😀")[..], &[0x3D, 0xD8, 0x00, 0xDE]);

    let server = MockTdsServer::builder().build().await.unwrap();
    let db = open(&server).await;

    let mut rows = db
        .query(
            Command::new("select @v")
                .bind(Param::new("v", "😀").with_type(SqlType::NVarChar(Some(10))))
                .arity(Arity::OneMust),
        )
        .await
        .unwrap();
    let mut back = String::new();
    assert!(rows.scan(&mut [&mut back]).await.unwrap());
    rows.close().await.unwrap();
    assert_eq!(back, "😀");
}

#[tokio::test]
async fn test_zero_must_with_rows_is_arity_error() {
    let server = MockTdsServer::builder()
        .with_response(
            "select name from sys.tables",
            MockResponse::rows(
                vec![column("name", SqlType::NVarChar(Some(128)))],
                vec![vec![Value::from("a")], vec![Value::from("b")]],
            ),
        )
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let err = db
        .query(Command::new("select name from sys.tables").arity(Arity::ZeroMust))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Arity {
            expected: Arity::ZeroMust,
            ..
        }
    ));

    let status = db.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, status.capacity);
    db.ping().await.unwrap();
}

#[tokio::test]
async fn test_query_timeout_sends_attention_and_keeps_session() {
    let server = MockTdsServer::builder()
        .with_response(
            "waitfor delay '00:00:02'; select 1",
            MockResponse::delay(Duration::from_secs(2), MockResponse::scalar(1i32)),
        )
        .build()
        .await
        .unwrap();
    let db = open_with(server.client_config().query_timeout(Duration::from_secs(1))).await;

    let err = db
        .query("waitfor delay '00:00:02'; select 1")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout | Error::Cancelled), "{err:?}");
    assert_eq!(server.attention_count(), 1);

    let status = db.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, status.capacity);

    db.ping().await.unwrap();
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_cancellation_token_interrupts_query() {
    let server = MockTdsServer::builder()
        .with_response(
            "slow",
            MockResponse::delay(Duration::from_secs(5), MockResponse::Done),
        )
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let err = db
        .query(Command::new("slow").cancel_token(token))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled), "{err:?}");
    assert_eq!(server.attention_count(), 1);
    db.ping().await.unwrap();
}

#[tokio::test]
async fn test_transaction_with_savepoint() {
    let server = MockTdsServer::builder()
        .with_response("update t set x = 1", MockResponse::affected(3))
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let mut tx = db.begin().await.unwrap();
    let descriptor = tx.descriptor();
    assert_ne!(descriptor, 0);

    tx.save_point("A").await.unwrap();
    assert_eq!(tx.exec("update t set x = 1").await.unwrap(), 3);
    tx.rollback_to("A").await.unwrap();
    assert_eq!(tx.descriptor(), descriptor);
    tx.commit().await.unwrap();

    db.exec("update t set x = 1").await.unwrap();

    let requests = server.requests().await;
    let update: Vec<_> = requests
        .iter()
        .filter(|r| r.sql == "update t set x = 1")
        .collect();
    assert_eq!(update.len(), 2);
    assert_eq!(update[0].descriptor, descriptor);
    assert_eq!(update[1].descriptor, 0);
    assert!(
        requests
            .iter()
            .filter(|r| r.packet_type == PacketType::TransactionManager)
            .count()
            >= 4
    );
}

#[tokio::test]
async fn test_rollback_to_unknown_savepoint_fails() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let db = open(&server).await;

    let mut tx = db.begin().await.unwrap();
    let err = tx.rollback_to("missing").await.unwrap_err();
    match err {
        Error::Server(messages) => assert_eq!(messages[0].number, 6401),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(tx.save_point("not valid").await.is_err());
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_login_failure_reports_server_error() {
    let server = MockTdsServer::builder()
        .with_credentials("app", "right")
        .build()
        .await
        .unwrap();
    let err = Database::open(server.client_config().credentials("app", "wrong"))
        .await
        .unwrap_err();
    match err {
        Error::Server(messages) => assert_eq!(messages[0].number, 18456),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_leaves_session_usable() {
    let server = MockTdsServer::builder()
        .with_response("select * from nowhere", MockResponse::error(208, "Invalid object name"))
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let err = db.query("select * from nowhere").await;
    let err = match err {
        Ok(mut rows) => rows.close().await.unwrap_err(),
        Err(e) => e,
    };
    assert!(err.to_string().contains("Invalid object name"));
    db.ping().await.unwrap();
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_procedure_output_and_return_status() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let db = open(&server).await;

    let mut result = db
        .query(
            Command::procedure("dbo.bump")
                .bind(Param::new("n", 41i32).output())
                .arity(Arity::Any),
        )
        .await
        .unwrap();
    while result.next().await.unwrap() {}
    result.close().await.unwrap();

    assert_eq!(result.output("n"), Some(&Value::I32(41)));
    assert_eq!(result.return_status(), Some(0));

    let requests = server.requests().await;
    assert_eq!(requests.last().unwrap().sql, "dbo.bump");
}

#[tokio::test]
async fn test_multiple_result_sets() {
    let server = MockTdsServer::builder()
        .with_response(
            "select 1; select 2",
            MockResponse::Sequence(vec![MockResponse::scalar(1i32), MockResponse::scalar(2i32)]),
        )
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let mut rows = db.query("select 1; select 2").await.unwrap();
    let mut n = 0i32;
    assert!(rows.scan(&mut [&mut n]).await.unwrap());
    assert_eq!(n, 1);
    assert!(!rows.scan(&mut [&mut n]).await.unwrap());
    assert!(rows.next_result().await.unwrap());
    assert!(rows.scan(&mut [&mut n]).await.unwrap());
    assert_eq!(n, 2);
    assert!(!rows.next_result().await.unwrap());
    rows.close().await.unwrap();
}

#[tokio::test]
async fn test_query_batches_runs_each_batch() {
    let server = MockTdsServer::builder()
        .with_response("insert t values (1)", MockResponse::affected(1))
        .with_response("insert t values (2)", MockResponse::affected(2))
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let affected = db
        .query_batches("insert t values (1)\ngo\ninsert t values (2)\nGO\n")
        .await
        .unwrap();
    assert_eq!(affected, 3);

    let batches: Vec<_> = server
        .requests()
        .await
        .into_iter()
        .filter(|r| r.sql.starts_with("insert t"))
        .collect();
    assert_eq!(batches.len(), 2);
}

#[tokio::test]
async fn test_bulk_insert_sends_rows() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let db = open(&server).await;

    let mut bulk = BulkInsert::new("dbo.items")
        .column("id", SqlType::Int)
        .column("name", SqlType::NVarChar(Some(50)));
    bulk.push_row(vec![Value::I32(1), Value::from("apple")]).unwrap();
    bulk.push_row(vec![Value::I32(2), Value::Null]).unwrap();

    assert_eq!(db.bulk_insert(&bulk).await.unwrap(), 2);

    let requests = server.requests().await;
    let load = requests
        .iter()
        .find(|r| r.packet_type == PacketType::BulkLoad)
        .unwrap();
    assert_eq!(load.bulk_rows.len(), 2);
    assert_eq!(load.bulk_rows[0][1], Value::from("apple"));
    assert_eq!(load.bulk_rows[1][1], Value::Null);
}

#[tokio::test]
async fn test_reset_connection_flag_on_reuse() {
    let server = MockTdsServer::builder().build().await.unwrap();
    let db = open_with(server.client_config().reset_connection(true)).await;

    db.ping().await.unwrap();
    db.ping().await.unwrap();

    let requests = server.requests().await;
    assert!(requests.last().unwrap().reset);
    assert_eq!(server.connection_count(), 1);
}

#[tokio::test]
async fn test_null_as_substitutes_missing_values() {
    let server = MockTdsServer::builder()
        .with_response(
            "select name from people",
            MockResponse::rows(
                vec![column("name", SqlType::NVarChar(Some(50)))],
                vec![vec![Value::Null]],
            ),
        )
        .build()
        .await
        .unwrap();
    let db = open(&server).await;

    let mut rows = db
        .query(
            Command::new("select name from people")
                .null_as("name", "anonymous")
                .arity(Arity::OneMust),
        )
        .await
        .unwrap();
    let name: Slot<String> = Slot::default();
    rows.prep("name", &name).unwrap();
    assert!(rows.next().await.unwrap());
    assert_eq!(name.get(), "anonymous");
    rows.close().await.unwrap();
}
