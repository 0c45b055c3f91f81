//! dateplan 命令行入口
//!
//! 从文件参数（缺省为 stdin）读取 DateRequest JSON，运行流水线，向 stdout 输出 PlanResponse JSON。
//!
//! ```text
//! echo '{"city":"Pune","budget_per_person":800,"date_time":"Saturday 7pm"}' | dateplan
//! dateplan request.json
//! ```

use std::io::Read;

use anyhow::Context;
use dateplan::config::load_config;
use dateplan::{observability, DateRequest, Orchestrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let raw = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read request file {}", path))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read request from stdin")?;
            buf
        }
    };
    let request: DateRequest =
        serde_json::from_str(&raw).context("Request is not a valid DateRequest JSON")?;

    let cfg = load_config(None)
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            Default::default()
        })
        .with_env_credentials();
    let orchestrator = Orchestrator::from_config(&cfg);

    let response = orchestrator
        .run(request)
        .await
        .context("Request rejected")?;
    let out = serde_json::to_string_pretty(&response).context("Failed to serialize response")?;
    println!("{}", out);
    Ok(())
}
