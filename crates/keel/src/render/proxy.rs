//! Edge proxy Caddyfile.

use keel_common::Site;
use keel_config::{ProxyConfig, RuntimeVersionSpec, Transport};
use std::fmt::Write as _;

use super::pages::{GATEWAY_ERROR_PAGE, NOT_FOUND_PAGE};
use super::{quote_path, write_header, write_log_block, RenderContext, RenderError};
use crate::control::ControlEndpoint;

/// Render the proxy configuration spanning every enabled runtime.
pub fn render_proxy(ctx: &RenderContext, proxy: &ProxyConfig) -> Result<String, RenderError> {
    ctx.validate()?;

    let endpoint = ControlEndpoint::for_proxy(ctx.transport, &ctx.paths, proxy.admin_port);
    let mut out = String::new();
    write_header(&mut out, "edge proxy");

    out.push_str("{\n");
    let _ = writeln!(out, "\tadmin {}", endpoint.caddy_admin_address());
    if ctx.dev_mode {
        out.push_str("\tauto_https off\n");
    } else if let Some(email) = ctx.admin_email.as_deref() {
        let _ = writeln!(out, "\temail {email}");
    }
    let _ = writeln!(out, "\thttp_port {}", proxy.http_port);
    let _ = writeln!(out, "\thttps_port {}", proxy.https_port);
    write_log_block(&mut out, "\t", &ctx.paths.log_dir.join("proxy.log"));
    out.push_str("}\n\n");

    let mut routed: Vec<&Site> = Vec::new();
    for site in ctx.sites.iter().filter(|s| s.is_active()) {
        match ctx.enabled_runtime(&site.runtime_version) {
            Some(runtime) => {
                write_site(&mut out, ctx, site, runtime);
                routed.push(site);
            }
            None => {
                let _ = writeln!(
                    out,
                    "# Skipped site: {} (runtime {} is not enabled)\n",
                    site.name.replace('\n', " "),
                    site.runtime_version
                );
            }
        }
    }

    if !ctx.dev_mode {
        if let Some(upstream) = ctx.acme_challenge_upstream.as_deref() {
            write_challenge_block(&mut out, &routed, upstream);
        }
    }

    out.push_str("# Unmatched hosts\n");
    let _ = writeln!(out, ":{} {{", proxy.http_port);
    out.push_str("\theader Content-Type text/html\n");
    let _ = writeln!(out, "\trespond `{NOT_FOUND_PAGE}` 404");
    out.push_str("}\n");

    Ok(out)
}

fn upstream(ctx: &RenderContext, runtime: &RuntimeVersionSpec) -> String {
    match ctx.transport {
        Transport::Tcp => format!("127.0.0.1:{}", runtime.port),
        Transport::Unix => format!("unix/{}", ctx.paths.runtime_socket(&runtime.version).display()),
    }
}

fn write_site(out: &mut String, ctx: &RenderContext, site: &Site, runtime: &RuntimeVersionSpec) {
    let addresses: Vec<String> = site
        .hostnames()
        .into_iter()
        .map(|h| {
            if ctx.dev_mode {
                format!("http://{h}")
            } else {
                h.to_string()
            }
        })
        .collect();

    let _ = writeln!(
        out,
        "# Site: {} (PHP {})",
        site.name.replace('\n', " "),
        runtime.version
    );
    let _ = writeln!(out, "{} {{", addresses.join(", "));

    if !ctx.dev_mode {
        if let Some(tls) = ctx.tls.get(&site.domain.trim().to_ascii_lowercase()) {
            let _ = writeln!(
                out,
                "\ttls {} {}",
                quote_path(&tls.cert_path),
                quote_path(&tls.key_path)
            );
        }
    }

    let _ = writeln!(out, "\treverse_proxy {} {{", upstream(ctx, runtime));
    out.push_str("\t\t@unavailable status 502 503 504\n");
    out.push_str("\t\thandle_response @unavailable {\n");
    out.push_str("\t\t\theader Content-Type text/html\n");
    let _ = writeln!(out, "\t\t\trespond `{GATEWAY_ERROR_PAGE}` {{rp.status_code}}");
    out.push_str("\t\t}\n");
    out.push_str("\t}\n");
    out.push_str("}\n\n");
}

fn write_challenge_block(out: &mut String, sites: &[&Site], upstream: &str) {
    let addresses: Vec<String> = sites
        .iter()
        .flat_map(|s| s.hostnames())
        .map(|h| format!("http://{h}"))
        .collect();
    if addresses.is_empty() {
        return;
    }

    out.push_str("# ACME HTTP-01 challenges\n");
    let _ = writeln!(out, "{} {{", addresses.join(", "));
    out.push_str("\thandle /.well-known/acme-challenge/* {\n");
    let _ = writeln!(out, "\t\treverse_proxy {upstream}");
    out.push_str("\t}\n");
    out.push_str("\thandle {\n");
    out.push_str("\t\tredir https://{host}{uri} permanent\n");
    out.push_str("\t}\n");
    out.push_str("}\n\n");
}
