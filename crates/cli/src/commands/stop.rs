//! `reagent stop`: flag a running request for stopping.

use reagent_core::stop::StopSignal;

pub async fn run(request_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;

    if store.request_stop(request_id).await {
        println!("🛑 Stop requested for {request_id}");
        println!("   The run ends at its next observation.");
        Ok(())
    } else {
        Err(format!("Could not flag '{request_id}' for stopping").into())
    }
}
