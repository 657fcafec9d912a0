//! Minimal trestle example — typed responses, raw streaming, and a commit
//! callback.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/hello
//!   curl -i http://localhost:3000/stream
//!   curl -i http://localhost:3000/anything-else

use trestle::{keys, middleware, Env, Error, Request, Response, Server, Value};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    Server::bind("0.0.0.0:3000")
        .await?
        .serve(middleware::trace(app))
        .await
}

async fn app(env: Env) -> Result<(), Error> {
    let path = env.get::<&str>(keys::REQUEST_PATH)?.to_owned();
    match path.as_str() {
        // Typed layer: build a Response, send it into the exchange.
        "/hello" => {
            let request = Request::from_env(env)?;
            Response::json(br#"{"greeting":"hello"}"#.to_vec())
                .send(request.env())
                .await
        }

        // Raw environment: chunked streaming, headers stamped at commit.
        "/stream" => {
            env.on_commit(|staged| {
                staged.append_header("x-committed", "just-in-time");
            });
            env.response_headers()
                .set("content-type", vec!["text/plain".into()]);

            let body = env.body();
            for chunk in ["streamed ", "in ", "three chunks\n"] {
                body.write(chunk.as_bytes().to_vec()).await?;
            }
            Ok(())
        }

        _ => {
            let mut env = env;
            env.set(keys::RESPONSE_STATUS, Value::Int(404));
            Ok(())
        }
    }
}
