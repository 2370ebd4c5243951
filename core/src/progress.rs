use indicatif::{ProgressBar, ProgressStyle};

pub fn default_style() -> ProgressStyle {
    match ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        Ok(style) => style.progress_chars("##-"),
        Err(_) => ProgressStyle::default_bar(),
    }
}

/// A bar for `len` files in the default style.
pub fn captioning_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(default_style());
    bar
}

pub fn captioning_message(name: &str) -> String {
    format!("Captioning: {}", name)
}
