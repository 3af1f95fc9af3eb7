//! Target image resolution.

use tracing::debug;

use reimage_fleet::{Image, ImageId};

use crate::context::RunContext;
use crate::error::{ReplaceError, ReplaceResult};

/// Newest image owned by `owner` whose name matches `name_filter`.
pub async fn newest_image(ctx: &RunContext, owner: &str, name_filter: &str) -> ReplaceResult<ImageId> {
    let mut images = ctx
        .clients
        .images
        .describe_images(owner, name_filter)
        .await
        .map_err(ReplaceError::fleet("describe images"))?;
    Image::sort_newest_first(&mut images);

    let newest = images.into_iter().next().ok_or_else(|| {
        ReplaceError::NotFound(format!("no image matching {name_filter} owned by {owner}"))
    })?;
    debug!(image = %newest.image_id, name = %newest.name, created = %newest.creation_date, "resolved target image");
    Ok(newest.image_id)
}
