use anyhow::Result;

pub fn run() -> Result<()> {
    println!("storyboard {}", env!("CARGO_PKG_VERSION"));
    println!("report format: run.json + events.jsonl");
    Ok(())
}
