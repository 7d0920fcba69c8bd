//! Build script for robofw
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! used by `robofw --version`.

fn main() {
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
