use std::path::Path;
use std::process::Command;

use irss_cli::ToolConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ToolConfig::from_env();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    let output_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| std::env::temp_dir().join("irss-selfcheck").display().to_string());

    println!(
        "irss-selfcheck: starting with model={} output={}",
        config.model_path.display(),
        output_dir
    );
    ensure_writable(&output_dir).await?;
    ensure_model(&config.model_path)?;
    ensure_tool("ffmpeg")?;
    ensure_tool("ffprobe")?;

    println!("irss-selfcheck: ok");
    Ok(())
}

async fn ensure_writable<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    let probe = path.join(".irss-selfcheck");
    tokio::fs::write(&probe, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} is not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_model(path: &Path) -> anyhow::Result<()> {
    if !irss_media::engine::is_model_available_at(path) {
        return Err(anyhow::anyhow!("model not found at {}", path.display()));
    }
    Ok(())
}

fn ensure_tool(name: &str) -> anyhow::Result<()> {
    let binary = which::which(name).map_err(|e| anyhow::anyhow!("{} not available: {}", name, e))?;
    let output = Command::new(&binary)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("{} not runnable: {}", name, e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("{} -version failed: {:?}", name, output.status));
    }
    Ok(())
}
