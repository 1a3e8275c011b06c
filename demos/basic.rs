use coordkv_http::{CoordKvClient, JsonDecoder, KvRequest, RetryNTimes};
use serde_json::Value;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // COORDKV_ENDPOINTS=http://10.0.0.1:2379,http://10.0.0.2:2379
    let client = CoordKvClient::from_env()?;

    client
        .execute(
            KvRequest::put("/v2/keys/foo").param("value", "bar"),
            JsonDecoder::<Value>::new(),
        )
        .await?;

    let promise = client.send(
        KvRequest::get("/v2/keys/foo").retry_policy(RetryNTimes::new(5)),
        JsonDecoder::<Value>::new(),
    );
    promise.add_listener(|outcome| match outcome {
        Ok(_) => println!("listener: got response"),
        Err(err) => println!("listener: {err}"),
    });

    let value = promise.wait().await?;
    println!("{}", value["node"]["value"]);
    println!("preferred endpoint: {}", client.preferred_endpoint());

    Ok(())
}
