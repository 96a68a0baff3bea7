extern crate minint;

use std::time::Duration;

use minint::{NtConn, NtError, PublishProps};

#[tokio::main]
async fn main() -> Result<(), NtError> {
    env_logger::init();
    let conn = NtConn::new([127, 0, 0, 1], "minint-test").await?;

    let mut test = conn.publish::<String>("/test", PublishProps::default()).await?;
    let mut position = conn
        .publish::<Vec<f64>>("/test/position", PublishProps::default())
        .await?;

    let mut i = 0;
    loop {
        test.set(format!("{i}"))?;
        position.set(vec![i as f64 * 0.01, 0.0, 0.5])?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        i += 1;
    }
}
