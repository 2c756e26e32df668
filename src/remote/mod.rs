//! Remote collaborators: index retrieval and font downloads.

pub mod client;
pub mod download;

use std::path::Path;

use crate::core::config::Config;
use crate::core::errors::Result;
use client::{HttpIndexClient, MirrorIndexSource, RemoteIndexSource};
use download::{Downloader, HttpDownloader, MirrorDownloader};

/// Index source and downloader for `config`, or for a local mirror directory
/// laid out like the server when `mirror` is given.
pub fn connect(
    config: &Config,
    mirror: Option<&Path>,
) -> Result<(Box<dyn RemoteIndexSource>, Box<dyn Downloader>)> {
    Ok(match mirror {
        Some(root) => (
            Box::new(MirrorIndexSource::new(root, &config.server.resource)),
            Box::new(MirrorDownloader::new(root)),
        ),
        None => (
            Box::new(
                HttpIndexClient::from_config(&config.server)?
                    .with_snapshot(&config.paths.remote_snapshot),
            ),
            Box::new(HttpDownloader::new(
                config.server.base_url(),
                config.server.request_timeout(),
            )?),
        ),
    })
}
