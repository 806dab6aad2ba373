use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use mailmirror::export::inline::rewrite_inline_references;
use mailmirror::model::files_map::FilesMapEntry;
use mailmirror::shortcode;

fn bench_allocate(c: &mut Criterion) {
    let ids: Vec<String> = (0..10_000)
        .map(|i| format!("AAMkAGI2TG93AAA-message-{i:06}"))
        .collect();

    c.bench_function("allocate_10k_ids", |b| {
        b.iter(|| shortcode::allocate("bench", ids.iter().map(String::as_str), None).unwrap())
    });

    let prior = shortcode::allocate("bench", ids.iter().map(String::as_str), None).unwrap();
    c.bench_function("allocate_10k_ids_with_prior", |b| {
        b.iter(|| shortcode::allocate("bench", ids.iter().map(String::as_str), Some(&prior)).unwrap())
    });
}

fn bench_inline_rewrite(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let html_path = dir.path().join("body.html");
    let mut html = String::new();
    let mut entries = Vec::new();
    for i in 0..50 {
        html.push_str(&format!("<p>paragraph {i}</p><img src=\"cid:image{i}@example\">"));
        let entry: FilesMapEntry = serde_json::from_value(json!({
            "attachmentId": format!("a{i}"),
            "attachmentShortcode": format!("__a{i}__"),
            "attachmentType": "fileAttachment",
            "isInline": true,
            "originalName": format!("image{i}.png"),
            "sanitizedName": format!("image{i}.png"),
            "relativePath": format!("inline/__a{i}__image{i}.png"),
            "contentType": "image/png",
            "size": 100,
            "contentId": format!("image{i}@example"),
            "contentLocation": null
        }))
        .unwrap();
        entries.push(entry);
    }

    c.bench_function("rewrite_50_inline_refs", |b| {
        b.iter(|| {
            std::fs::write(&html_path, &html).unwrap();
            rewrite_inline_references(&html_path, &entries).unwrap()
        })
    });
}

criterion_group!(benches, bench_allocate, bench_inline_rewrite);
criterion_main!(benches);
