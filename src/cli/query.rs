use anyhow::Result;
use clap::Args;

use folio::config::FolioConfig;
use folio::error::Error;
use folio::library::{Principal, QueryContext, QueryOutcome, ThingId};

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Resource id, e.g. /collections/recipes
    pub resource: String,

    /// Principal id the query runs as (anonymous when omitted)
    #[arg(long)]
    pub principal: Option<String>,

    /// Group the principal belongs to (repeatable)
    #[arg(long = "group")]
    pub groups: Vec<String>,

    /// Run as an administrator
    #[arg(long)]
    pub admin: bool,

    /// Print the compact summary form instead of the full record
    #[arg(long)]
    pub summary: bool,

    /// Print the resolved type definition instead of the record
    #[arg(long)]
    pub metadata: bool,

    /// Resolve the id as a digital representation
    #[arg(long)]
    pub representation: bool,

    /// First collection member to include (zero-based)
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Collection page size (library default when omitted)
    #[arg(long)]
    pub limit: Option<usize>,
}

/// Resolve one resource from the terminal and print the outcome.
pub async fn query(config: &FolioConfig, args: &QueryArgs) -> Result<()> {
    let library = super::open_library(config).await?;

    let mut principal = match args.principal.as_deref() {
        Some(id) => Principal::user(id),
        None => Principal::anonymous(),
    };
    principal.administrator = args.admin;
    for group in &args.groups {
        principal = principal.with_group(group);
    }

    let ctx = QueryContext {
        resource_id: ThingId::new(&args.resource),
        principal,
        metadata: args.metadata,
        representation: args.representation,
        summary: args.summary,
        offset: args.offset,
        limit: args.limit,
    };

    match library.query(&ctx).await? {
        QueryOutcome::Object(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        QueryOutcome::File(path) | QueryOutcome::LocalContent(path) => {
            println!("{}", path.display())
        }
        QueryOutcome::NotFound => return Err(Error::NotFound(args.resource.clone()).into()),
        QueryOutcome::CannotRead => {
            return Err(Error::PermissionDenied(args.resource.clone()).into())
        }
    }

    Ok(())
}
