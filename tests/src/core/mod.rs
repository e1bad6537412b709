mod label;
