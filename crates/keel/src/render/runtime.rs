//! Per-version runtime Caddyfile.

use keel_common::Site;
use keel_config::{RuntimeVersionSpec, Transport};
use std::fmt::Write as _;

use super::{matcher_name, quote, quote_path, write_header, write_log_block, RenderContext, RenderError};
use crate::control::ControlEndpoint;

/// Workers per site when the site does not say
const DEFAULT_WORKER_NUM: u32 = 2;

/// Render the configuration for one runtime version.
///
/// Only active sites pinned to `spec.version` are included. With no such
/// site a placeholder block answering 503 is rendered so the process still
/// starts and listens.
pub fn render_runtime(ctx: &RenderContext, spec: &RuntimeVersionSpec) -> Result<String, RenderError> {
    ctx.validate()?;

    let version = spec.version.as_str();
    let endpoint = ControlEndpoint::for_runtime(ctx.transport, &ctx.paths, spec);
    let mut out = String::new();
    write_header(&mut out, &format!("PHP {version} runtime"));

    out.push_str("{\n");
    let _ = writeln!(out, "\tadmin {}", endpoint.caddy_admin_address());
    write_frankenphp_options(&mut out, spec);
    write_log_block(
        &mut out,
        "\t",
        &ctx.paths.runtime_log_dir(version).join("caddy.log"),
    );
    out.push_str("}\n\n");

    let sites: Vec<&Site> = ctx.active_sites_for(version).collect();
    if sites.is_empty() {
        let _ = writeln!(out, "# No active sites for PHP {version}");
        write_listener_open(&mut out, ctx, spec);
        out.push_str("\trespond \"No sites configured\" 503\n");
        out.push_str("}\n");
        return Ok(out);
    }

    write_listener_open(&mut out, ctx, spec);
    for site in sites {
        write_site(&mut out, ctx, site);
    }
    out.push_str("\n\t# Unknown hosts\n");
    out.push_str("\thandle {\n");
    out.push_str("\t\trespond \"Site not found\" 404\n");
    out.push_str("\t}\n");
    out.push_str("}\n");

    Ok(out)
}

fn write_frankenphp_options(out: &mut String, spec: &RuntimeVersionSpec) {
    if spec.num_threads == 0 && spec.max_threads == 0 {
        out.push_str("\tfrankenphp\n");
        return;
    }
    out.push_str("\tfrankenphp {\n");
    if spec.num_threads > 0 {
        let _ = writeln!(out, "\t\tnum_threads {}", spec.num_threads);
    }
    if spec.max_threads > 0 {
        let _ = writeln!(out, "\t\tmax_threads {}", spec.max_threads);
    }
    out.push_str("\t}\n");
}

fn write_listener_open(out: &mut String, ctx: &RenderContext, spec: &RuntimeVersionSpec) {
    match ctx.transport {
        Transport::Tcp => {
            let _ = writeln!(out, "http://:{} {{", spec.port);
            out.push_str("\tbind 127.0.0.1\n");
        }
        Transport::Unix => {
            out.push_str("http:// {\n");
            let _ = writeln!(
                out,
                "\tbind unix/{}",
                ctx.paths.runtime_socket(&spec.version).display()
            );
        }
    }
}

fn write_site(out: &mut String, ctx: &RenderContext, site: &Site) {
    let matcher = matcher_name(&site.id);
    let _ = writeln!(out, "\n\t# Site: {} ({})", site.name.replace('\n', " "), site.domain);
    let _ = writeln!(out, "\t@{matcher} host {}", site.hostnames().join(" "));
    let _ = writeln!(out, "\thandle @{matcher} {{");
    let _ = writeln!(out, "\t\troot * {}", quote_path(&site.document_root()));
    out.push_str("\t\tencode zstd br gzip\n");

    let worker = site.worker_path().and_then(|path| {
        if (ctx.worker_exists)(&path) {
            Some(path)
        } else {
            out.push_str("\t\t# Worker file not found, serving in classic mode\n");
            let _ = writeln!(out, "\t\t# Expected: {}", path.display());
            None
        }
    });

    if worker.is_none() && site.environment.is_empty() {
        out.push_str("\t\tphp_server\n");
    } else {
        out.push_str("\t\tphp_server {\n");
        if let Some(path) = worker {
            let num = site.worker_num.filter(|n| *n > 0).unwrap_or(DEFAULT_WORKER_NUM);
            let _ = writeln!(out, "\t\t\tworker {} {num}", quote_path(&path));
        }
        for (key, value) in &site.environment {
            let _ = writeln!(out, "\t\t\tenv {key} {}", quote(value));
        }
        out.push_str("\t\t}\n");
    }

    out.push_str("\t}\n");
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use std::path::Path;

    fn spec_84(ctx: &RenderContext) -> RuntimeVersionSpec {
        ctx.enabled_runtime("8.4").unwrap().clone()
    }

    #[test]
    fn test_placeholder_without_sites() {
        let ctx = context(vec![site("a", "a.test", "8.3")]);
        let text = render_runtime(&ctx, &spec_84(&ctx)).unwrap();

        assert!(text.contains("admin localhost:2084"));
        assert!(text.contains("http://:9084 {"));
        assert!(text.contains("respond \"No sites configured\" 503"));
        assert!(!text.contains("a.test"));
    }

    #[test]
    fn test_site_block_classic_mode() {
        let mut s = site("a", "shop.test", "8.4");
        s.aliases = vec!["www.shop.test".into()];
        s.environment.insert("APP_ENV".into(), "production".into());
        let ctx = context(vec![s]);
        let text = render_runtime(&ctx, &spec_84(&ctx)).unwrap();

        assert!(text.contains("\t@site_a host shop.test www.shop.test\n"));
        assert!(text.contains("\t\troot * \"/srv/a/public\"\n"));
        assert!(text.contains("\t\t\tenv APP_ENV \"production\"\n"));
        assert!(!text.contains("worker "));
        assert!(text.contains("respond \"Site not found\" 404"));
    }

    #[test]
    fn test_worker_mode_requires_existing_file() {
        let mut s = site("a", "shop.test", "8.4");
        s.worker_mode = true;
        s.worker_file = Some("worker.php".into());

        let mut ctx = context(vec![s]);
        ctx.worker_exists = |_: &Path| false;
        let text = render_runtime(&ctx, &spec_84(&ctx)).unwrap();
        assert!(text.contains("# Worker file not found"));
        assert!(text.contains("\t\tphp_server\n"));

        ctx.worker_exists = |_: &Path| true;
        let text = render_runtime(&ctx, &spec_84(&ctx)).unwrap();
        assert!(text.contains("\t\t\tworker \"/srv/a/public/worker.php\" 2\n"));
    }

    #[test]
    fn test_thread_knobs() {
        let ctx = context(vec![]);
        let mut spec = spec_84(&ctx);
        spec.num_threads = 4;
        spec.max_threads = 16;
        let text = render_runtime(&ctx, &spec).unwrap();
        assert!(text.contains("\t\tnum_threads 4\n\t\tmax_threads 16\n"));
    }

    #[test]
    fn test_unix_transport_binds_socket() {
        let mut ctx = context(vec![site("a", "shop.test", "8.4")]);
        ctx.transport = Transport::Unix;
        let text = render_runtime(&ctx, &spec_84(&ctx)).unwrap();

        assert!(text.contains("admin unix//sock/php-8.4-admin.sock"));
        assert!(text.contains("http:// {\n\tbind unix//sock/php-8.4.sock\n"));
    }

    #[test]
    fn test_invalid_site_aborts_render() {
        let ctx = context(vec![site("a", "bad host", "8.4")]);
        assert!(matches!(
            render_runtime(&ctx, &spec_84(&ctx)),
            Err(RenderError::InvalidHostname { .. })
        ));
    }
}
