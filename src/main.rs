#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_session_engine::run().await {
        eprintln!("exam-session-engine fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
