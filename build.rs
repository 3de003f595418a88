use rustc_version::{version_meta, Channel};

fn main() {
    // enable docsrs cfg flag in nightly channel builds
    // used for #![cfg_attr(all(doc, docsrs), feature(doc_auto_cfg))]
    if version_meta().is_ok_and(|meta| meta.channel == Channel::Nightly) {
        println!("cargo:rustc-cfg=docsrs")
    }
}
