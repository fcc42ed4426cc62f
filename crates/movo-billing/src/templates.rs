//! # Email Templates
//!
//! Subject and HTML body for every reminder kind.
//!
//! | kind       | header color | call to action        |
//! |------------|--------------|-----------------------|
//! | `trial_N`  | blue         | Ver planes de pago    |
//! | `due_N`    | amber        | Ir a facturación      |
//! | `grace_N`  | red          | Pagar ahora           |
//! | `blocked`  | dark red     | Reactivar mi cuenta   |
//!
//! Substitution points: brand name, recipient name, days remaining,
//! billing link and amount due.
//!
//! Receipts have their own layout, see [`render_receipt`].

use movo_core::{FiscalIdentity, NotificationKind};

/// Values substituted into a template.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub brand_name: String,
    /// Greeting name; falls back to the brand's customer wording when empty.
    pub recipient_name: String,
    pub billing_url: String,
    /// Already formatted, e.g. `RD$1,300.00`.
    pub amount_due: String,
    pub year: i32,
}

/// A rendered subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

struct Layout<'a> {
    color: &'a str,
    button_color: &'a str,
    title: String,
    lead: String,
    detail: String,
    button: &'a str,
    warning: bool,
}

/// Renders the email for a reminder kind.
pub fn render(kind: NotificationKind, ctx: &TemplateContext) -> RenderedEmail {
    let brand = escape(&ctx.brand_name);

    let (subject, layout) = match kind {
        NotificationKind::Trial(days) => (
            if days == 0 {
                "Tu período de prueba termina hoy".to_string()
            } else {
                format!("Te quedan {} de prueba", day_count(days))
            },
            Layout {
                color: "#3b82f6",
                button_color: "#3b82f6",
                title: brand.clone(),
                lead: if days == 0 {
                    format!("Tu período de prueba de {} termina hoy.", brand)
                } else {
                    format!(
                        "Te quedan <strong>{}</strong> de período de prueba en {}.",
                        day_count(days),
                        brand
                    )
                },
                detail: format!(
                    "Para continuar sin interrupciones, elige tu plan. El monto mensual es <strong>{}</strong>.",
                    escape(&ctx.amount_due)
                ),
                button: "Ver planes de pago",
                warning: false,
            },
        ),
        NotificationKind::Due(days) => (
            if days == 0 {
                "Tu suscripción vence hoy".to_string()
            } else {
                format!("Tu suscripción vence en {}", day_count(days))
            },
            Layout {
                color: "#f59e0b",
                button_color: "#f59e0b",
                title: brand.clone(),
                lead: if days == 0 {
                    format!("Tu suscripción de {} vence hoy.", brand)
                } else {
                    format!(
                        "Tu suscripción de {} vence en <strong>{}</strong>.",
                        brand,
                        day_count(days)
                    )
                },
                detail: format!(
                    "Para evitar interrupciones, realiza tu pago de <strong>{}</strong> antes del vencimiento.",
                    escape(&ctx.amount_due)
                ),
                button: "Ir a facturación",
                warning: false,
            },
        ),
        NotificationKind::Grace(days) => (
            if days == 0 {
                "⚠️ Tu cuenta será bloqueada hoy".to_string()
            } else {
                format!("⚠️ Tu cuenta será bloqueada en {}", day_count(days))
            },
            Layout {
                color: "#ef4444",
                button_color: "#ef4444",
                title: "⚠️ Acción requerida".to_string(),
                lead: if days == 0 {
                    "Tu cuenta será bloqueada hoy si no realizas el pago.".to_string()
                } else {
                    format!(
                        "Tu cuenta será bloqueada en {} si no realizas el pago.",
                        day_count(days)
                    )
                },
                detail: format!(
                    "Tu período de gracia está por terminar. Una vez bloqueada, no podrás acceder a tu punto de venta hasta pagar <strong>{}</strong>.",
                    escape(&ctx.amount_due)
                ),
                button: "Pagar ahora",
                warning: true,
            },
        ),
        NotificationKind::Blocked => (
            "🔒 Tu cuenta ha sido bloqueada".to_string(),
            Layout {
                color: "#991b1b",
                button_color: "#16a34a",
                title: "🔒 Cuenta bloqueada".to_string(),
                lead: format!("Tu cuenta de {} ha sido bloqueada por falta de pago.", brand),
                detail: format!(
                    "Para recuperar el acceso, realiza el pago de <strong>{}</strong>. Si crees que es un error, contáctanos.",
                    escape(&ctx.amount_due)
                ),
                button: "Reactivar mi cuenta",
                warning: false,
            },
        ),
    };

    RenderedEmail {
        subject: format!("{} | {}", subject, ctx.brand_name),
        html: wrap(&layout, ctx),
    }
}

/// Values printed on a receipt email. Dates and amounts come preformatted.
#[derive(Debug, Clone)]
pub struct ReceiptEmailContext {
    pub brand_name: String,
    pub recipient_name: String,
    /// `REC-00001`
    pub number: String,
    pub amount: String,
    pub issued_on: String,
    /// `16/01/2024 - 15/02/2024`, when the payment covered a period.
    pub period: Option<String>,
    pub method: String,
    pub reference: Option<String>,
    /// Omitted from the body when the account never set one.
    pub identity: Option<FiscalIdentity>,
    pub year: i32,
}

/// Renders the email that carries a receipt.
pub fn render_receipt(ctx: &ReceiptEmailContext) -> RenderedEmail {
    let name = if ctx.recipient_name.trim().is_empty() {
        "cliente".to_string()
    } else {
        escape(ctx.recipient_name.trim())
    };

    let client = match &ctx.identity {
        Some(identity) => format!(
            r#"<tr><td style="color:#666;">Cliente</td><td><strong>{}</strong><br>RNC/Cédula: {}<br>{}</td></tr>"#,
            escape(&identity.legal_name),
            escape(&identity.tax_id),
            escape(&identity.address),
        ),
        None => String::new(),
    };

    let concept = match &ctx.period {
        Some(period) => format!("Suscripción {} ({})", escape(&ctx.brand_name), escape(period)),
        None => format!("Suscripción {}", escape(&ctx.brand_name)),
    };

    let method = match &ctx.reference {
        Some(reference) => format!("{}<br>Ref: {}", escape(&ctx.method), escape(reference)),
        None => escape(&ctx.method),
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family:Arial,sans-serif;line-height:1.6;color:#333;">
  <div style="max-width:600px;margin:0 auto;padding:20px;">
    <div style="background:#16a34a;color:white;padding:20px;text-align:center;border-radius:8px 8px 0 0;">
      <h1>Recibo {number}</h1>
      <p style="font-size:28px;margin:8px 0;"><strong>{amount}</strong></p>
      <span style="background:white;color:#16a34a;padding:4px 12px;border-radius:12px;font-weight:bold;">PAGADO</span>
    </div>
    <div style="background:#f9fafb;padding:20px;border-radius:0 0 8px 8px;">
      <h2>Hola {name},</h2>
      <p>Recibimos tu pago. Gracias por confiar en {brand}.</p>
      <table style="width:100%;border-collapse:collapse;">
        <tr><td style="color:#666;">Fecha de emisión</td><td>{issued_on}</td></tr>
        {client}
        <tr><td style="color:#666;">Concepto</td><td>{concept}</td></tr>
        <tr><td style="color:#666;">Método de pago</td><td>{method}</td></tr>
      </table>
    </div>
    <div style="text-align:center;margin-top:20px;color:#666;font-size:12px;">
      <p>Este es un recibo interno y no constituye un comprobante fiscal (NCF).</p>
      <p>© {year} {brand}. Todos los derechos reservados.</p>
    </div>
  </div>
</body>
</html>"#,
        number = escape(&ctx.number),
        amount = escape(&ctx.amount),
        name = name,
        brand = escape(&ctx.brand_name),
        issued_on = escape(&ctx.issued_on),
        client = client,
        concept = concept,
        method = method,
        year = ctx.year,
    );

    RenderedEmail {
        subject: format!("Recibo de pago {} | {}", ctx.number, ctx.brand_name),
        html,
    }
}

fn wrap(layout: &Layout<'_>, ctx: &TemplateContext) -> String {
    let name = if ctx.recipient_name.trim().is_empty() {
        "cliente".to_string()
    } else {
        escape(ctx.recipient_name.trim())
    };

    let lead = if layout.warning {
        format!(
            r#"<div style="background:#fef2f2;border:1px solid #ef4444;padding:12px;border-radius:6px;margin:16px 0;"><strong>{}</strong></div>"#,
            layout.lead
        )
    } else {
        format!("<p>{}</p>", layout.lead)
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family:Arial,sans-serif;line-height:1.6;color:#333;">
  <div style="max-width:600px;margin:0 auto;padding:20px;">
    <div style="background:{color};color:white;padding:20px;text-align:center;border-radius:8px 8px 0 0;">
      <h1>{title}</h1>
    </div>
    <div style="background:#f9fafb;padding:20px;border-radius:0 0 8px 8px;">
      <h2>Hola {name},</h2>
      {lead}
      <p>{detail}</p>
      <p><a href="{url}" style="display:inline-block;background:{button_color};color:white;padding:12px 24px;text-decoration:none;border-radius:6px;">{button}</a></p>
    </div>
    <div style="text-align:center;margin-top:20px;color:#666;font-size:12px;">
      <p>© {year} {brand}. Todos los derechos reservados.</p>
    </div>
  </div>
</body>
</html>"#,
        color = layout.color,
        title = layout.title,
        name = name,
        lead = lead,
        detail = layout.detail,
        url = escape(&ctx.billing_url),
        button_color = layout.button_color,
        button = layout.button,
        year = ctx.year,
        brand = escape(&ctx.brand_name),
    )
}

fn day_count(days: u32) -> String {
    if days == 1 {
        "1 día".to_string()
    } else {
        format!("{} días", days)
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
