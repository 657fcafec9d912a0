//! End-to-end tests of the response adapter: commit semantics, header
//! projection, transfer framing, and fault behavior as a real client on a
//! real socket observes them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use trestle::{keys, Env, Error, Value};

mod common;

#[tokio::test]
async fn empty_exchange_completes_chunked() {
    let addr = common::spawn(|_env: Env| async { Ok(()) }).await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.reason, "OK");
    assert_eq!(res.header("transfer-encoding"), Some("chunked"));
    assert!(res.header("server").is_some());
    assert!(res.body.is_empty());
    assert!(res.complete);
}

#[tokio::test]
async fn custom_headers_keep_order_and_multiplicity() {
    let addr = common::spawn(|env: Env| async move {
        let headers = env.response_headers();
        headers.set("Custom1", vec!["value1a".into(), "value1b".into()]);
        headers.set("Custom2", vec!["value2a, value2b".into()]);
        headers.set("Custom3", vec!["value3a, value3b".into(), "value3c".into()]);
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.header_values("Custom1"), vec!["value1a", "value1b"]);
    assert_eq!(res.header_values("Custom2"), vec!["value2a, value2b"]);
    assert_eq!(res.header_values("Custom3"), vec!["value3a, value3b", "value3c"]);
}

#[tokio::test]
async fn reserved_headers_take_the_transport_path() {
    let addr = common::spawn(|env: Env| async move {
        let headers = env.response_headers();
        headers.set("KEEP-alive", vec!["TRUE".into()]);
        headers.set("content-length", vec!["0".into()]);
        headers.set("www-Authenticate", vec!["Basic".into(), "NTLM".into()]);
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.header("content-length"), Some("0"));
    // keep-alive is transport-managed, never emitted literally.
    assert!(res.header("keep-alive").is_none());
    // www-authenticate is NOT restricted: both values survive.
    assert_eq!(res.header_values("www-authenticate"), vec!["Basic", "NTLM"]);
    assert!(res.complete);
}

#[tokio::test]
async fn framing_headers_tolerate_arbitrary_casing() {
    let addr = common::spawn(|env: Env| async move {
        let headers = env.response_headers();
        headers.set("Transfer-Encoding", vec!["ChUnKed".into()]);
        headers.set("CONNECTION", vec!["ClOsE".into()]);
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.header("transfer-encoding"), Some("chunked"));
    assert_eq!(res.header("connection"), Some("close"));
    assert!(res.complete);
}

#[tokio::test]
async fn negative_content_length_degrades_to_500() {
    let addr = common::spawn(|env: Env| async move {
        env.response_headers().set("content-length", vec!["-10".into()]);
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 500);
    assert_eq!(res.header("content-length"), Some("0"));
    assert!(res.body.is_empty());
}

#[tokio::test]
async fn custom_reason_phrase_reaches_the_status_line() {
    let addr = common::spawn(|mut env: Env| async move {
        env.set(keys::RESPONSE_REASON, Value::from("Awesome"));
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.reason, "Awesome");
}

#[tokio::test]
async fn non_string_reason_phrase_degrades_to_500() {
    let addr = common::spawn(|mut env: Env| async move {
        env.set(keys::RESPONSE_REASON, Value::Int(i64::from(i32::MAX)));
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 500);
}

#[tokio::test]
async fn foreign_protocol_requests_are_not_honored() {
    for requested in ["http/1.0", "http/2.0"] {
        let addr = common::spawn(move |mut env: Env| async move {
            env.set(keys::RESPONSE_PROTOCOL, Value::from(requested));
            Ok(())
        })
        .await;

        let res = common::get(addr, "/").await.unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(res.version, "HTTP/1.1");
    }
}

#[tokio::test]
async fn small_chunked_body_round_trips() {
    let addr = common::spawn(|env: Env| async move {
        env.body().write(vec![7u8; 10]).await?;
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.header("transfer-encoding"), Some("chunked"));
    assert_eq!(res.body, vec![7u8; 10]);
    assert!(res.complete);
}

#[tokio::test]
async fn large_chunked_body_round_trips() {
    let addr = common::spawn(|env: Env| async move {
        let body = env.body();
        for _ in 0..100 {
            body.write(vec![0u8; 1000]).await?;
        }
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.body.len(), 100 * 1000);
    assert!(res.complete);
}

#[tokio::test]
async fn writing_less_than_declared_aborts_the_connection() {
    let addr = common::spawn(|env: Env| async move {
        env.response_headers().set("Content-Length", vec!["100".into()]);
        env.body().write(vec![0u8; 95]).await?;
        Ok(())
    })
    .await;

    // Never a clean 200 with a truncated body: either the read fails
    // outright or the framing is visibly unsatisfied.
    match common::get(addr, "/").await {
        Err(_) => {}
        Ok(res) => assert!(!res.complete, "truncated body was presented as complete"),
    }
}

#[tokio::test]
async fn writing_more_than_declared_aborts_the_connection() {
    let addr = common::spawn(|env: Env| async move {
        env.response_headers().set("Content-Length", vec!["100".into()]);
        env.body().write(vec![0u8; 105]).await?;
        Ok(())
    })
    .await;

    match common::get(addr, "/").await {
        Err(_) => {}
        Ok(res) => assert!(!res.complete, "overrun body was presented as complete"),
    }
}

#[tokio::test]
async fn status_100_cannot_be_sent_and_degrades_to_500() {
    let addr = common::spawn(|mut env: Env| async move {
        env.set(keys::RESPONSE_STATUS, Value::Int(100));
        Ok(())
    })
    .await;

    let res = common::post(addr, "/", "Hello World").await.unwrap();
    assert_eq!(res.status, 500);
}

#[tokio::test]
async fn status_101_sends_head_without_body() {
    let addr = common::spawn(|mut env: Env| async move {
        env.set(keys::RESPONSE_STATUS, Value::Int(101));
        env.response_headers().set("content-length", vec!["10".into()]);
        env.body().write(vec![0u8; 10]).await?;
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 101);
    assert!(res.header("content-length").is_none());
    assert!(res.body.is_empty());
}

#[tokio::test]
async fn commit_callback_fires_before_first_write() {
    let addr = common::spawn(|mut env: Env| async move {
        env.set(keys::RESPONSE_STATUS, Value::Int(200));
        env.set(keys::RESPONSE_REASON, Value::from("Custom"));
        env.on_commit(|staged| {
            staged.set_header("custom-header", vec!["customvalue".into()]);
        });
        env.response_headers().set("content-length", vec!["10".into()]);
        env.body().write(vec![0u8; 10]).await?;
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(res.reason, "Custom");
    assert_eq!(res.header("custom-header"), Some("customvalue"));
    assert_eq!(res.body.len(), 10);
    assert!(res.complete);
}

#[tokio::test]
async fn commit_callback_fires_at_completion_without_writes() {
    let addr = common::spawn(|mut env: Env| async move {
        env.set(keys::RESPONSE_STATUS, Value::Int(200));
        env.set(keys::RESPONSE_REASON, Value::from("Custom"));
        env.on_commit(|staged| {
            staged.set_status(201);
            staged.set_reason("Custom1");
            staged.set_header("custom-header", vec!["customvalue".into()]);
        });
        env.response_headers().set("content-length", vec!["0".into()]);
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 201);
    assert_eq!(res.reason, "Custom1");
    assert_eq!(res.header("custom-header"), Some("customvalue"));
    assert!(res.body.is_empty());
    assert!(res.complete);
}

#[tokio::test]
async fn app_error_before_commit_degrades_to_500() {
    let addr = common::spawn(|_env: Env| async { Err(Error::App("boom".into())) }).await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 500);
    assert_eq!(res.header("content-length"), Some("0"));
}

#[tokio::test]
async fn app_error_after_commit_aborts_the_connection() {
    let addr = common::spawn(|env: Env| async move {
        env.body().write(&b"partial"[..]).await?;
        Err(Error::App("boom".into()))
    })
    .await;

    match common::get(addr, "/").await {
        Err(_) => {}
        // Chunked stream with no terminal chunk: visibly incomplete.
        Ok(res) => assert!(!res.complete),
    }
}

#[tokio::test]
async fn app_panic_before_commit_degrades_to_500() {
    let panicked = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&panicked);
    let addr = common::spawn(move |_env: Env| {
        let flag = Arc::clone(&flag);
        async move {
            flag.store(true, Ordering::SeqCst);
            panic!("application bug");
        }
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 500);
    assert!(panicked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn late_header_mutation_is_ignored_not_fatal() {
    let addr = common::spawn(|env: Env| async move {
        env.body().write(&b"sent"[..]).await?;
        // All discarded: the head is already on the wire.
        env.response_headers().set("too-late", vec!["x".into()]);
        let mut env = env;
        env.set(keys::RESPONSE_STATUS, Value::Int(404));
        env.body().write(&b" and more"[..]).await?;
        Ok(())
    })
    .await;

    let res = common::get(addr, "/").await.unwrap();
    assert_eq!(res.status, 200);
    assert!(res.header("too-late").is_none());
    assert_eq!(res.body, b"sent and more");
    assert!(res.complete);
}
