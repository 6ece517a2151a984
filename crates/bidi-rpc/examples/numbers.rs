//! Two sessions calling each other: the server keeps a list of numbers and
//! asks the client to add them up on every insert.

use proven_bidi_rpc::{Connection, Error, Invocation, Server, link};

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let values = Arc::new(Mutex::new(Vec::<i64>::new()));
    let server = {
        let values = Arc::clone(&values);
        Server::new(move |session: Connection| {
            let values = Arc::clone(&values);
            async move {
                session
                    .register("insert", move |call: Invocation| {
                        let values = Arc::clone(&values);
                        async move {
                            let n: i64 = call.arg(0)?;
                            let snapshot = {
                                let mut values = values.lock();
                                values.push(n);
                                values.clone()
                            };
                            call.session()
                                .remote()
                                .invoke("sum", vec![json!(snapshot)])
                                .await
                        }
                    })
                    .await
            }
        })
    };

    let client = Connection::new(|session: Connection| async move {
        session
            .register("sum", |call: Invocation| async move {
                let list: Vec<i64> = call.arg(0)?;
                Ok::<_, Error>(json!(list.iter().sum::<i64>()))
            })
            .await
    });

    let conn = server.create_connection();
    let link = link(&conn, &client)?;
    client.ready().await?;
    conn.ready().await?;

    for n in [2, 4] {
        let sum = client.remote().invoke("insert", vec![json!(n)]).await?;
        info!(n, %sum, "Inserted");
    }
    info!(values = ?*values.lock(), "Final state");

    link.shutdown().await;
    Ok(())
}
