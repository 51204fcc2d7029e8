use anyhow::Result;
use tracing::{info, warn};

use crate::cli::SitesArgs;
use crate::config::LakeLayout;
use crate::error::DropResult;
use crate::filename::FilenameParser;
use crate::model::DropKind;
use crate::sites::SiteRegistry;

pub fn run(args: SitesArgs) -> Result<()> {
    let (layout, _) = LakeLayout::resolve(&args.lake)?;
    let registry = SiteRegistry::load(&layout.sites_path)?;

    if args.names.is_empty() {
        info!(path = %layout.sites_path.display(), sites = registry.len(), "site table");
        for (token, id) in registry.iter() {
            info!(token, site = id, "site");
        }
        return Ok(());
    }

    let parser = FilenameParser::new()?;
    for name in &args.names {
        match resolve_name(&registry, &parser, name) {
            Ok((token, id)) => info!(name = %name, token = %token, site = %id, "resolved"),
            Err(err) => warn!(name = %name, error = %err, "unresolved"),
        }
    }
    Ok(())
}

/// A name is either a drop filename or a bare token.
fn resolve_name(
    registry: &SiteRegistry,
    parser: &FilenameParser,
    name: &str,
) -> DropResult<(String, String)> {
    let token = match parser.parse_drop(DropKind::Adsb, name) {
        Ok(identity) => identity.site_token.unwrap_or_default(),
        Err(_) => name.to_string(),
    };
    let id = registry.resolve(&token)?.to_string();
    Ok((token, id))
}
