use anyhow::Result;

use folio::config::FolioConfig;
use folio::error::Error;
use folio::library::{Principal, QueryContext, QueryOutcome, ThingId};

/// List recent changes, or expand one commit when an id is given.
pub async fn changes(
    config: &FolioConfig,
    commit: Option<&str>,
    offset: usize,
    limit: Option<usize>,
) -> Result<()> {
    let library = super::open_library(config).await?;

    let resource = match commit {
        Some(id) => format!("{}/{}", config.library.changes_path, id),
        None => config.library.changes_path.clone(),
    };

    let ctx = QueryContext {
        resource_id: ThingId::new(&resource),
        principal: Principal::administrator(),
        metadata: false,
        representation: false,
        summary: false,
        offset,
        limit,
    };

    match library.query(&ctx).await? {
        QueryOutcome::Object(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        QueryOutcome::NotFound => return Err(Error::NotFound(resource).into()),
        other => anyhow::bail!("unexpected outcome for {resource}: {other:?}"),
    }

    Ok(())
}
