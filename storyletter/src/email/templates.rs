//! HTML bodies for the outbound email surfaces.
//!
//! These mirror the rendered newsletter styling; the core treats them as
//! opaque strings handed to the transport.

use crate::storage::Story;

pub fn welcome_html(unsubscribe_url: &str) -> String {
    format!(
        r#"
    <div style="font-family: sans-serif; max-width: 600px; margin: 0 auto;">
        <h1 style="color: #4F46E5;">Welcome to Bedtime Stories! 🌙</h1>
        <p style="color: #374151; font-size: 16px;">
            You've successfully subscribed. Get ready for magical tales delivered straight to your inbox everyday.
        </p>
        <div style="background: #F3F4F6; padding: 16px; border-radius: 8px; margin: 20px 0;">
            <h3 style="margin-top: 0;">✨ What to expect:</h3>
            <ul style="color: #4B5563;">
                <li>Unique, AI-generated stories appropriate for children.</li>
                <li>Adventures, fables, and calming bedtime tales.</li>
                <li>A perfect way to start or end the day!</li>
            </ul>
        </div>
        <p style="font-size: 12px; color: #6B7280; text-align: center; margin-top: 40px;">
            If you wish to stop receiving stories, you can <a href="{unsubscribe_url}" style="color: #6B7280;">unsubscribe here</a>.
        </p>
    </div>
  "#
    )
}

pub fn story_html(story: &Story, unsubscribe_url: &str) -> String {
    let bullets: String = story
        .summary_bullets
        .iter()
        .map(|b| format!("<li>{}</li>", b))
        .collect();

    format!(
        r#"
    <div style="font-family: sans-serif; max-width: 600px; margin: 0 auto;">
      <h1 style="color: #4F46E5;">{title}</h1>

      <div style="background: #F3F4F6; padding: 16px; border-radius: 8px; margin: 20px 0;">
        <h3 style="margin-top: 0;">📚 Story Summary:</h3>
        <ul>
          {bullets}
        </ul>
      </div>

      <div style="line-height: 1.8; color: #374151;">
        {content}
      </div>

      <hr style="margin: 40px 0; border: none; border-top: 1px solid #E5E7EB;">

      <p style="font-size: 12px; color: #6B7280; text-align: center;">
        <a href="{unsubscribe_url}" style="color: #6B7280;">Unsubscribe</a>
      </p>
    </div>
  "#,
        title = story.title,
        bullets = bullets,
        content = story.content,
        unsubscribe_url = unsubscribe_url,
    )
}

pub fn admin_review_html(story_title: &str, review_url: &str, date_str: &str, is_draft: bool) -> String {
    let header = if is_draft {
        format!("<h2>Review Pending for {}</h2>", date_str)
    } else {
        format!("<h2>New Story Generated for {}</h2>", date_str)
    };

    let subtext = if is_draft {
        "<p>This story was already generated but hasn't been approved yet.</p>"
    } else {
        ""
    };

    format!(
        r#"
    {header}
    <h3>{story_title}</h3>
    {subtext}
    <p>Click the link below to review and approve:</p>
    <a href="{review_url}" style="display: inline-block; padding: 12px 24px; background: #4F46E5; color: white; text-decoration: none; border-radius: 6px;">Review Story</a>
  "#
    )
}

pub fn unsubscribed_page() -> &'static str {
    r#"
      <html>
        <head><title>Unsubscribed</title></head>
        <body style="font-family: sans-serif; text-align: center; padding: 50px;">
          <h1>You have been unsubscribed.</h1>
          <p>You will no longer receive bedtime stories. Sleep tight!</p>
        </body>
      </html>
    "#
}
