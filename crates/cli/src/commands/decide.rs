//! `reagent approve` / `reagent reject`: answer a pending confirmation.

use reagent_core::confirmation::ConfirmationTransport;

pub async fn run(id: &str, approve: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = super::open_store(&config).await?;

    let delivered = if approve {
        store.approve(id).await
    } else {
        store.reject(id).await
    };

    let verb = if approve { "Approved" } else { "Rejected" };
    if delivered {
        println!("✅ {verb} {id}");
        Ok(())
    } else {
        Err(format!("No pending confirmation '{id}' (unknown, expired or already decided)").into())
    }
}
