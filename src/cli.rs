use clap::ValueEnum;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Full-size originals (thumbnail URLs are rewritten first)
    Original,
    /// The cached thumbnails exactly as listed
    Thumbnail,
}
