pub mod attachments;
pub mod media;
pub mod normalize;
pub mod tags;

use attachments::Resolution;

/// Page markup → markdown, with stored images linked to their local copies.
pub fn to_markdown(markup: &str, resolution: &Resolution, link_base: &str) -> String {
    normalize::normalize(&resolution.rewrite_image_links(markup, link_base))
}
