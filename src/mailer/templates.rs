pub struct EmailContent {
    pub subject: String,
    pub body: String,
}

fn greeting(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("Hello {name},"),
        None => "Hello,".to_string(),
    }
}

pub fn verify_email(name: Option<&str>, link: &str) -> EmailContent {
    EmailContent {
        subject: "Verify your email address".into(),
        body: format!(
            "{}\n\nPlease confirm your email address by opening the link below:\n\n{link}\n\n\
             This link expires in 24 hours. If you did not create an account, ignore this email.\n",
            greeting(name)
        ),
    }
}

pub fn reset_password(name: Option<&str>, link: &str) -> EmailContent {
    EmailContent {
        subject: "Reset your password".into(),
        body: format!(
            "{}\n\nWe received a request to reset your password. Open the link below to choose a new one:\n\n{link}\n\n\
             This link expires in 1 hour. If you did not ask for a reset, you can ignore this email.\n",
            greeting(name)
        ),
    }
}
