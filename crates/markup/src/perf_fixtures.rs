//! Synthetic documents for benches and throughput checks.

pub const BLOCK_TEMPLATE: &str =
    "<div class=box><b>hello &amp; welcome</b><img src=\"x&lt;y\" alt=pic><!-- note --></div>\n";

/// `blocks` copies of [`BLOCK_TEMPLATE`].
pub fn make_blocks(blocks: usize) -> String {
    let mut doc = String::with_capacity(BLOCK_TEMPLATE.len() * blocks);
    for _ in 0..blocks {
        doc.push_str(BLOCK_TEMPLATE);
    }
    doc
}

/// Long text with an entity every `stride` bytes.
pub fn make_entity_text(len: usize, stride: usize) -> String {
    let stride = stride.max(1);
    let mut doc = String::with_capacity(len + len / stride * 5);
    while doc.len() < len {
        for _ in 0..stride {
            doc.push('x');
        }
        doc.push_str("&amp;");
    }
    doc
}
