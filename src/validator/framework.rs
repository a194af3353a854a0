//! Node.js framework detection from `package.json` dependency maps, by a
//! fixed precedence list — the first match wins, so frameworks that compose
//! with others (e.g. a Next.js app that also depends on React) resolve to
//! the more specific one.

use std::path::Path;

const PRECEDENCE: &[(&str, &str)] = &[
    ("next", "Next.js"),
    ("nuxt", "Nuxt"),
    ("@remix-run/react", "Remix"),
    ("gatsby", "Gatsby"),
    ("astro", "Astro"),
    ("@sveltejs/kit", "SvelteKit"),
    ("@builder.io/qwik-city", "Qwik City"),
    ("@angular/core", "Angular"),
    ("react", "React"),
    ("vue", "Vue"),
    ("svelte", "Svelte"),
    ("solid-js", "Solid"),
    ("preact", "Preact"),
    ("express", "Express"),
    ("fastify", "Fastify"),
    ("@nestjs/core", "NestJS"),
    ("koa", "Koa"),
    ("hono", "Hono"),
    ("@hapi/hapi", "Hapi"),
];

pub fn detect_framework(package_json_path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(package_json_path).ok()?;
    let parsed: serde_json::Value = serde_json::from_str(&contents).ok()?;

    let mut deps = serde_json::Map::new();
    if let Some(obj) = parsed.get("dependencies").and_then(|v| v.as_object()) {
        deps.extend(obj.clone());
    }
    if let Some(obj) = parsed.get("devDependencies").and_then(|v| v.as_object()) {
        deps.extend(obj.clone());
    }

    for (package_name, framework) in PRECEDENCE {
        if deps.contains_key(*package_name) {
            return Some(framework.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_package_json(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("package.json");
        fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn detects_next_over_react() {
        let (_dir, path) = write_package_json(
            r#"{"dependencies":{"next":"^14","react":"^18"}}"#,
        );
        assert_eq!(detect_framework(&path).as_deref(), Some("Next.js"));
    }

    #[test]
    fn detects_plain_react() {
        let (_dir, path) = write_package_json(r#"{"dependencies":{"react":"^18"}}"#);
        assert_eq!(detect_framework(&path).as_deref(), Some("React"));
    }

    #[test]
    fn detects_express_in_dev_dependencies() {
        let (_dir, path) = write_package_json(r#"{"devDependencies":{"express":"^4"}}"#);
        assert_eq!(detect_framework(&path).as_deref(), Some("Express"));
    }

    #[test]
    fn returns_none_for_no_known_framework() {
        let (_dir, path) = write_package_json(r#"{"dependencies":{"lodash":"^4"}}"#);
        assert_eq!(detect_framework(&path), None);
    }

    #[test]
    fn returns_none_for_malformed_json() {
        let (_dir, path) = write_package_json("not json");
        assert_eq!(detect_framework(&path), None);
    }
}
