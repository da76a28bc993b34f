use crate::types::{Notification, NotificationKind};
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client as SesClient;

fn from_address() -> String {
    std::env::var("SES_FROM_ADDRESS").unwrap_or_else(|_| "noreply@replanta.pt".to_string())
}

/// Wrap body copy in the shared Replanta layout
fn html_template(title: &str, body_html: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="pt">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <style>
        body {{
            font-family: 'HelveticaNeue', Helvetica, Arial, sans-serif;
            line-height: 1.6;
            color: #333333;
            background: #ffffff;
            margin: 0;
            padding: 0;
        }}
        .wrapper {{
            max-width: 600px;
            margin: 0 auto;
            padding: 60px 20px;
        }}
        .container {{
            background: #ffffff;
            border: 1px solid #e5e5e5;
            padding: 60px 50px;
        }}
        .logo {{
            font-size: 24px;
            font-weight: 300;
            color: #2e7d32;
            margin: 0 0 40px 0;
            text-align: center;
            letter-spacing: -0.5px;
        }}
        .title {{
            font-size: 20px;
            font-weight: 300;
            color: #000000;
            margin: 0 0 24px 0;
        }}
        .text {{
            font-size: 15px;
            font-weight: 400;
            color: #333333;
            margin: 0 0 24px 0;
            line-height: 1.6;
        }}
        .button-wrapper {{
            text-align: center;
            margin: 32px 0;
        }}
        .button {{
            display: inline-block;
            width: 100%;
            max-width: 280px;
            padding: 18px 24px;
            background: #2e7d32;
            color: #ffffff;
            text-decoration: none;
            font-weight: 400;
            font-size: 15px;
            text-align: center;
            box-sizing: border-box;
        }}
        .footer {{
            margin-top: 48px;
            padding-top: 24px;
            border-top: 1px solid #e5e5e5;
            font-size: 13px;
            font-weight: 300;
            color: #666666;
            text-align: center;
        }}
        @media only screen and (max-width: 600px) {{
            .container {{
                padding: 40px 24px;
            }}
            .wrapper {{
                padding: 40px 16px;
            }}
        }}
    </style>
</head>
<body>
    <div class="wrapper">
        <div class="container">
            <h1 class="logo">Replanta</h1>

            <h2 class="title">{}</h2>

            {}

            <div class="footer">
                <p>© 2026 Replanta</p>
            </div>
        </div>
    </div>
</body>
</html>"#,
        title, body_html
    )
}

async fn send(
    ses_client: &SesClient,
    to_email: &str,
    subject_line: &str,
    html_body: String,
    text_body: String,
) -> Result<(), String> {
    let destination = Destination::builder().to_addresses(to_email).build();

    let subject = Content::builder()
        .data(subject_line)
        .charset("UTF-8")
        .build()
        .map_err(|e| format!("Failed to build subject: {:?}", e))?;

    let html_content = Content::builder()
        .data(html_body)
        .charset("UTF-8")
        .build()
        .map_err(|e| format!("Failed to build HTML content: {:?}", e))?;

    let text_content = Content::builder()
        .data(text_body)
        .charset("UTF-8")
        .build()
        .map_err(|e| format!("Failed to build text content: {:?}", e))?;

    let body = Body::builder().html(html_content).text(text_content).build();

    let message = Message::builder().subject(subject).body(body).build();

    let email_content = EmailContent::builder().simple(message).build();

    ses_client
        .send_email()
        .from_email_address(from_address())
        .destination(destination)
        .content(email_content)
        .send()
        .await
        .map_err(|e| format!("Failed to send email: {:?}", e))?;

    Ok(())
}

/// Confirmation sent right after registration, before any admin review
pub async fn send_registration_received_email(
    ses_client: &SesClient,
    to_email: &str,
    name: &str,
) -> Result<(), String> {
    let html_body = html_template(
        "Registo recebido",
        &format!(
            r#"<p class="text">Olá {},</p>
            <p class="text">
                Recebemos o seu registo na Replanta. A sua conta será analisada
                por um administrador e receberá uma notificação assim que for aprovada.
            </p>"#,
            name
        ),
    );
    let text_body = format!(
        "Replanta\n\nRegisto recebido\n\nOlá {},\n\nRecebemos o seu registo na Replanta. \
         A sua conta será analisada por um administrador e receberá uma notificação \
         assim que for aprovada.\n\n© 2026 Replanta",
        name
    );

    send(
        ses_client,
        to_email,
        "Replanta - Registo recebido",
        html_body,
        text_body,
    )
    .await
}

pub fn notification_subject(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::UserRegistered => "Replanta - Novo registo pendente",
        NotificationKind::UserApproved => "Replanta - Conta aprovada",
        NotificationKind::UserRejected => "Replanta - Registo não aprovado",
        NotificationKind::RoleChanged => "Replanta - Papel atualizado",
        NotificationKind::ProjectCreated => "Replanta - Novo projeto",
        NotificationKind::ProjectStatusChanged => "Replanta - Projeto atualizado",
        NotificationKind::CollaboratorAdded => "Replanta - Projeto atribuído",
        NotificationKind::TaskAssigned => "Replanta - Nova tarefa",
        NotificationKind::NoteAdded => "Replanta - Nova nota",
    }
}

/// Email rendering of a stored notification, used by the delivery worker
pub async fn send_notification_email(
    ses_client: &SesClient,
    to_email: &str,
    notification: &Notification,
    frontend_url: &str,
) -> Result<(), String> {
    let link = match &notification.project_id {
        Some(project_id) => format!("{}/projects/{}", frontend_url, project_id),
        None => format!("{}/notifications", frontend_url),
    };

    let html_body = html_template(
        &notification.title,
        &format!(
            r#"<p class="text">{}</p>
            <div class="button-wrapper">
                <a href="{}" class="button">Abrir Replanta</a>
            </div>"#,
            notification.message, link
        ),
    );
    let text_body = format!(
        "Replanta\n\n{}\n\n{}\n\n{}\n\n© 2026 Replanta",
        notification.title, notification.message, link
    );

    send(
        ses_client,
        to_email,
        notification_subject(notification.kind),
        html_body,
        text_body,
    )
    .await
}
